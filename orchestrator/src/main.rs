use std::{env, time::Duration};

use anyhow::{Context, bail};
use orchestrator::{
    Handle, ImportOptions, Metric, ProblemKind, Session, SessionOptions,
    configs::{JobConfig, SearchConfig},
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = env::args()
        .nth(1)
        .context("usage: orchestrator <job.json>")?;
    let job = JobConfig::from_path(&path)?;

    let options = SessionOptions {
        nthreads: job.nthreads,
        max_mem: job.max_mem,
        timeout: Some(Duration::from_secs(job.timeout_secs)),
    };
    let mut session = Session::connect_with(job.address.as_str(), options)?;
    let cluster = session.cluster();
    println!(
        "connected to {} ({} threads)",
        cluster.name, cluster.nthreads
    );

    let frame = session.import_dataset_with(
        &job.dataset,
        ImportOptions {
            destination: None,
            categorical: job.categorical.clone(),
        },
    )?;
    println!("{}: {} rows", frame.key(), frame.rows());

    let (training, validation) = match &job.split {
        Some(split) => {
            let mut parts = session.split(&frame, &split.ratios, split.seed)?.into_iter();
            let training = parts.next().context("split returned no parts")?;
            let validation = parts.next().filter(|part| part.rows() > 0);
            (training, validation)
        }
        None => (frame, None),
    };

    let model = match &job.search {
        None => session.fit(&job.model, &training, validation.as_ref())?,
        Some(search) => {
            let grid = match search {
                SearchConfig::Grid { hyper_params } => {
                    session.grid_search(hyper_params, &job.model, &training, validation.as_ref())?
                }
                SearchConfig::Random {
                    space,
                    trials,
                    seed,
                } => session.random_search(
                    space,
                    &job.model,
                    *trials,
                    *seed,
                    &training,
                    validation.as_ref(),
                )?,
            };

            let Some(first) = grid.models.first() else {
                bail!("{} trained no models", grid.id);
            };
            let metric = job.rank_by.unwrap_or(match first.model.problem() {
                ProblemKind::Classification => Metric::Logloss,
                ProblemKind::Regression => Metric::Mse,
            });

            println!("{} ranked by {metric:?}:", grid.id);
            let ranked = grid.sorted_by(metric, metric.higher_is_better());
            for entry in &ranked {
                println!(
                    "  {:<24} {:>12.6}  {:?}",
                    entry.model.key(),
                    entry.score(metric).unwrap_or(f64::NAN),
                    entry.params
                );
            }

            ranked[0].model.clone()
        }
    };

    let scored = validation.as_ref().unwrap_or(&training);
    let metrics = session.performance(&model, scored)?;
    println!("{} on {}:\n{metrics}", model.key(), scored.key());

    if let Some(dir) = &job.save_dir {
        let path = session.save(&model, dir)?;
        println!("saved to {}", path.display());
    }

    session.close()?;
    Ok(())
}
