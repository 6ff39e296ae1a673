use std::{
    net::{SocketAddr, ToSocketAddrs},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Reply},
    specs::{
        cluster::{ClusterInfo, ClusterSpec},
        frame::{FrameData, check_split_ratios},
        metrics::MetricsSummary,
        model::{ModelMeta, TrainSpec},
    },
};
use log::{debug, info, warn};
use tokio::{
    io,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::Runtime,
    time::{self, Instant},
};

use crate::{
    configs::{Adapter, ModelConfig},
    error::SessionError,
    handles::{Frame, Handle, Model},
    registry::Registry,
    search::{Combination, Grid, GridModel, HyperParams, SearchSpace},
};

type NetRx = OnoReceiver<OwnedReadHalf>;
type NetTx = OnoSender<OwnedWriteHalf>;

/// Resources asked from the node and the client's patience.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub nthreads: Option<NonZeroUsize>,
    pub max_mem: Option<u64>,
    /// How long a single call may wait for its answer, `None` waits forever.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// The key of the new frame, the node derives one from the file name otherwise.
    pub destination: Option<String>,
    /// Columns read as categorical even if every value is a number.
    pub categorical: Vec<String>,
}

/// The request/response channel to a node.
struct Connection {
    rx: NetRx,
    tx: NetTx,
    next_id: u64,
    timeout: Option<Duration>,
    /// Set when a call timed out halfway through writing its request.
    broken: bool,
}

impl Connection {
    /// Sends `cmd` and waits for the answer that carries its id.
    ///
    /// Answers to earlier requests, left behind by timed out calls, are skipped.
    /// Reading resumes where a timed out call stopped, so a half read answer is
    /// finished and dropped by the next call.
    async fn call(&mut self, cmd: Command) -> Result<Reply, SessionError> {
        if self.broken {
            return Err(SessionError::Connection(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "an earlier call timed out while sending its request",
            )));
        }

        self.next_id += 1;
        let id = self.next_id;
        let name = cmd.name();
        debug!(id = id; "sending {name}");

        let deadline = self.timeout.map(|limit| (Instant::now() + limit, limit));

        let sent = within(deadline, self.tx.send(&Msg::Control { id, cmd })).await;
        if sent.is_err() {
            warn!(id = id; "{name} timed out mid request, the connection is no longer usable");
            self.broken = true;
        }
        sent??;

        within(deadline, Self::reply(&mut self.rx, id, name)).await?
    }

    async fn reply(rx: &mut NetRx, id: u64, name: &str) -> Result<Reply, SessionError> {
        loop {
            match rx.recv::<Msg>().await? {
                Msg::Reply { id: got, reply } if got == id => return Ok(reply),
                Msg::Err(fault) if fault.id.is_none_or(|got| got == id) => {
                    return Err(fault.into());
                }
                msg => match msg.id() {
                    Some(stale) if stale < id => {
                        debug!(id = stale; "dropping stale answer");
                    }
                    _ => {
                        return Err(SessionError::Protocol(format!(
                            "unexpected message while waiting for {name}: {msg:?}"
                        )));
                    }
                },
            }
        }
    }
}

/// Runs `fut` to completion or until the deadline, if any, passes.
async fn within<F: Future>(
    deadline: Option<(Instant, Duration)>,
    fut: F,
) -> Result<F::Output, SessionError> {
    match deadline {
        Some((at, limit)) => time::timeout_at(at, fut)
            .await
            .map_err(|_| SessionError::Timeout(limit)),
        None => Ok(fut.await),
    }
}

/// A connection to a node together with the handles created through it.
///
/// Every operation blocks until the node answers.
pub struct Session {
    runtime: Runtime,
    addr: SocketAddr,
    conn: Connection,
    cluster: ClusterInfo,
    registry: Registry,
    adapter: Adapter,
    next_grid: usize,
}

impl Session {
    /// Connects to the node at `addr` with default options.
    ///
    /// # Errors
    /// `SessionError::Connection` if the node is unreachable.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, SessionError> {
        Self::connect_with(addr, SessionOptions::default())
    }

    /// Connects to the node at `addr`, asking for the resources in `options`.
    ///
    /// The node answers with the resources it actually has, a mismatch is only logged.
    ///
    /// # Arguments
    /// * `addr` - The network address of the node.
    /// * `options` - The requested resources and the call timeout.
    ///
    /// # Returns
    /// A new `Session` instance.
    ///
    /// # Errors
    /// `SessionError::Connection` if the node is unreachable and
    /// `SessionError::Timeout` if it does not answer the handshake in time.
    pub fn connect_with<A: ToSocketAddrs>(
        addr: A,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "the address resolved to nothing")
        })?;

        let runtime = Runtime::new()?;
        let mut conn = runtime.block_on(Self::open_channel(addr, options.timeout))?;

        let spec = ClusterSpec {
            nthreads: options.nthreads,
            max_mem: options.max_mem,
        };
        let cluster = match runtime.block_on(conn.call(Command::Connect(spec)))? {
            Reply::Cluster(info) => info,
            other => return Err(unexpected("cluster", &other)),
        };

        if let Some(nthreads) = options.nthreads
            && nthreads != cluster.nthreads
        {
            warn!(
                "asked for {nthreads} threads, node {} has {}",
                cluster.name, cluster.nthreads
            );
        }

        if options.max_mem.is_some() && options.max_mem != cluster.max_mem {
            warn!(
                "asked for {:?} bytes of memory, node {} has {:?}",
                options.max_mem, cluster.name, cluster.max_mem
            );
        }

        info!(
            "connected to {} (version {}) at {addr}",
            cluster.name, cluster.version
        );

        Ok(Self {
            runtime,
            addr,
            conn,
            cluster,
            registry: Registry::new(),
            adapter: Adapter::new(),
            next_grid: 0,
        })
    }

    /// What the node reported about itself when the session was opened.
    pub fn cluster(&self) -> &ClusterInfo {
        &self.cluster
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.conn.timeout
    }

    /// Changes how long subsequent calls wait for their answer.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.conn.timeout = timeout;
    }

    // -------------------------------------------------------------------------
    // Frames
    // -------------------------------------------------------------------------

    /// Imports a CSV file readable by the node.
    ///
    /// # Errors
    /// `SessionError::NotFound` if the node cannot find `path`.
    pub fn import_dataset<P: AsRef<Path>>(&mut self, path: P) -> Result<Frame, SessionError> {
        self.import_dataset_with(path, ImportOptions::default())
    }

    /// Imports a CSV file readable by the node.
    ///
    /// # Arguments
    /// * `path` - The path of the file, as seen by the node.
    /// * `options` - The key of the new frame and the columns forced categorical.
    ///
    /// # Errors
    /// `SessionError::NotFound` if the node cannot find `path` and
    /// `SessionError::Validation` if a forced column does not exist.
    pub fn import_dataset_with<P: AsRef<Path>>(
        &mut self,
        path: P,
        options: ImportOptions,
    ) -> Result<Frame, SessionError> {
        let path = path.as_ref().to_path_buf();
        info!("importing {}", path.display());

        let frame = self.call_frame(Command::ImportFile {
            path,
            destination: options.destination,
            categorical: options.categorical,
        })?;

        info!(
            "imported {} with {} rows and {} columns",
            frame.key(),
            frame.rows(),
            frame.columns().len()
        );
        Ok(frame)
    }

    /// Sends in-memory data to the node as a new frame.
    ///
    /// # Errors
    /// `SessionError::Validation` if the columns have different lengths or repeated names.
    pub fn upload(
        &mut self,
        destination: Option<&str>,
        data: FrameData,
    ) -> Result<Frame, SessionError> {
        data.validate().map_err(SessionError::Validation)?;

        self.call_frame(Command::Upload {
            destination: destination.map(str::to_string),
            data,
        })
    }

    /// Creates a copy of `frame` where `column` is categorical.
    ///
    /// # Errors
    /// `SessionError::Validation` if the column does not exist and
    /// `SessionError::State` if the handle is no longer valid.
    pub fn as_factor(&mut self, frame: &Frame, column: &str) -> Result<Frame, SessionError> {
        let meta = self.registry.frame(frame)?;
        if meta.column(column).is_none() {
            return Err(SessionError::Validation(format!(
                "column '{column}' is not in frame {}",
                meta.key
            )));
        }

        self.call_frame(Command::AsFactor {
            frame: frame.key().to_string(),
            column: column.to_string(),
        })
    }

    /// Partitions the rows of `frame` at random.
    ///
    /// Returns one frame per ratio plus a last one holding the remaining rows, which may be empty.
    ///
    /// # Arguments
    /// * `frame` - The frame to split.
    /// * `ratios` - The share of rows of each part, every one in `(0, 1]` and adding up to at most one.
    /// * `seed` - The seed of the shuffle, the same seed yields the same partition.
    ///
    /// # Errors
    /// `SessionError::Validation` if the ratios are malformed and
    /// `SessionError::State` if the handle is no longer valid.
    pub fn split(
        &mut self,
        frame: &Frame,
        ratios: &[f64],
        seed: u64,
    ) -> Result<Vec<Frame>, SessionError> {
        check_split_ratios(ratios).map_err(SessionError::Validation)?;
        self.registry.frame(frame)?;

        let reply = self.call(Command::Split {
            frame: frame.key().to_string(),
            ratios: ratios.to_vec(),
            seed,
        })?;

        let Reply::Frames(metas) = reply else {
            return Err(unexpected("frames", &reply));
        };

        let parts: Vec<Frame> = metas
            .into_iter()
            .map(|meta| self.registry.insert_frame(meta))
            .collect();

        debug!(
            "split {} into {:?}",
            frame.key(),
            parts.iter().map(Frame::rows).collect::<Vec<_>>()
        );
        Ok(parts)
    }

    /// Pulls every row of `frame` back from the node.
    pub fn fetch(&mut self, frame: &Frame) -> Result<FrameData, SessionError> {
        self.fetch_rows(frame, None)
    }

    /// Pulls the first `n` rows of `frame` back from the node.
    pub fn head(&mut self, frame: &Frame, n: usize) -> Result<FrameData, SessionError> {
        self.fetch_rows(frame, Some(n))
    }

    fn fetch_rows(&mut self, frame: &Frame, limit: Option<usize>) -> Result<FrameData, SessionError> {
        self.registry.frame(frame)?;

        match self.call(Command::Fetch {
            frame: frame.key().to_string(),
            limit,
        })? {
            Reply::Data(data) => Ok(data),
            other => Err(unexpected("data", &other)),
        }
    }

    /// Looks up a frame on the node by key, including frames created by other sessions.
    pub fn describe_frame(&mut self, key: &str) -> Result<Frame, SessionError> {
        self.call_frame(Command::DescribeFrame {
            key: key.to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // Models
    // -------------------------------------------------------------------------

    /// Trains a model on the node.
    ///
    /// # Arguments
    /// * `config` - The model configuration.
    /// * `training` - The frame to train on.
    /// * `validation` - The frame the validation metrics are computed on, if any.
    ///
    /// # Returns
    /// The handle of the trained model.
    ///
    /// # Errors
    /// `SessionError::Validation` if the configuration is malformed, does not
    /// match the frames or does not continue its checkpoint consistently.
    /// Nothing is sent to the node in that case.
    pub fn fit(
        &mut self,
        config: &ModelConfig,
        training: &Frame,
        validation: Option<&Frame>,
    ) -> Result<Model, SessionError> {
        let spec = self.prepare(config, training, validation)?;
        self.train(spec)
    }

    /// Trains one model per combination of candidate values.
    ///
    /// Every combination is checked before the first one is trained.
    ///
    /// # Arguments
    /// * `hyper_params` - The candidate values of each option.
    /// * `base` - The options shared by every model.
    /// * `training` - The frame to train on.
    /// * `validation` - The frame the models are ranked on, if any.
    ///
    /// # Errors
    /// `SessionError::Validation` if any combination is invalid.
    pub fn grid_search(
        &mut self,
        hyper_params: &HyperParams,
        base: &ModelConfig,
        training: &Frame,
        validation: Option<&Frame>,
    ) -> Result<Grid, SessionError> {
        let combinations = hyper_params.combinations()?;
        info!(
            "grid search over {} combinations of {}",
            combinations.len(),
            base.algorithm()
        );
        self.search(combinations, base, training, validation)
    }

    /// Trains `trials` models with options drawn from `space`.
    ///
    /// # Errors
    /// `SessionError::Validation` if a sampler or any drawn combination is invalid.
    pub fn random_search(
        &mut self,
        space: &SearchSpace,
        base: &ModelConfig,
        trials: usize,
        seed: u64,
        training: &Frame,
        validation: Option<&Frame>,
    ) -> Result<Grid, SessionError> {
        let combinations = space.draw(trials, seed)?;
        info!("random search with {trials} trials of {}", base.algorithm());
        self.search(combinations, base, training, validation)
    }

    fn search(
        &mut self,
        combinations: Vec<Combination>,
        base: &ModelConfig,
        training: &Frame,
        validation: Option<&Frame>,
    ) -> Result<Grid, SessionError> {
        let mut prepared = Vec::with_capacity(combinations.len());
        for (i, params) in combinations.into_iter().enumerate() {
            let mut config = base.clone();
            for (name, value) in &params {
                config.apply(name, value)?;
            }

            if let Some(id) = base.model_id() {
                config.set_model_id(Some(format!("{id}_{i}")));
            }

            let spec = self.prepare(&config, training, validation)?;
            prepared.push((params, spec));
        }

        self.next_grid += 1;
        let id = format!("grid_{}", self.next_grid);

        let mut models = Vec::with_capacity(prepared.len());
        for (params, spec) in prepared {
            let model = self.train(spec)?;
            debug!("{id}: trained {} with {params:?}", model.key());
            models.push(GridModel { params, model });
        }

        Ok(Grid { id, models })
    }

    /// Checks `config` against the frames and its checkpoint and builds the training request.
    fn prepare(
        &mut self,
        config: &ModelConfig,
        training: &Frame,
        validation: Option<&Frame>,
    ) -> Result<TrainSpec, SessionError> {
        let training = self.registry.frame(training)?.clone();
        let validation = validation
            .map(|frame| self.registry.frame(frame).cloned())
            .transpose()?;

        let checkpoint = match config.checkpoint() {
            Some(key) => self.checkpoint_meta(key)?,
            None => None,
        };

        self.adapter.adapt_train(
            config,
            &training,
            validation.as_ref(),
            checkpoint.as_ref(),
        )
    }

    /// The metadata of the model a fit continues, `None` if the node does not know it.
    fn checkpoint_meta(&mut self, key: &str) -> Result<Option<ModelMeta>, SessionError> {
        if let Some(meta) = self.registry.model_by_key(key) {
            return Ok(Some(meta.clone()));
        }

        match self.describe_model(key) {
            Ok(model) => Ok(Some(model.meta().clone())),
            Err(SessionError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn train(&mut self, spec: TrainSpec) -> Result<Model, SessionError> {
        let algorithm = spec.algorithm.name();
        info!("training {algorithm} on {}", spec.training_frame);

        let model = self.call_model(Command::Train(spec))?;
        info!(
            "trained {} ({:?}, {} epochs)",
            model.key(),
            model.problem(),
            model.epochs_trained()
        );
        Ok(model)
    }

    /// Scores every row of `frame`.
    ///
    /// # Errors
    /// `SessionError::State` if the frame lacks a feature the model was trained on,
    /// a feature has a different type or either handle is no longer valid.
    pub fn predict(&mut self, model: &Model, frame: &Frame) -> Result<Frame, SessionError> {
        self.check_schema(model, frame, false)?;

        self.call_frame(Command::Predict {
            model: model.key().to_string(),
            frame: frame.key().to_string(),
        })
    }

    /// Computes the metrics of `model` on `frame`.
    ///
    /// # Errors
    /// `SessionError::State` if the frame lacks a feature or the response,
    /// a column has a different type or either handle is no longer valid.
    pub fn performance(
        &mut self,
        model: &Model,
        frame: &Frame,
    ) -> Result<MetricsSummary, SessionError> {
        self.check_schema(model, frame, true)?;

        match self.call(Command::Performance {
            model: model.key().to_string(),
            frame: frame.key().to_string(),
        })? {
            Reply::Metrics(metrics) => Ok(metrics),
            other => Err(unexpected("metrics", &other)),
        }
    }

    fn check_schema(
        &self,
        model: &Model,
        frame: &Frame,
        with_response: bool,
    ) -> Result<(), SessionError> {
        let model = self.registry.model(model)?;
        let frame = self.registry.frame(frame)?;
        let needed = model
            .features
            .iter()
            .chain(with_response.then_some(&model.response));

        for expected in needed {
            let Some(column) = frame.column(&expected.name) else {
                return Err(SessionError::State(format!(
                    "frame {} is missing column '{}' of model {}",
                    frame.key, expected.name, model.key
                )));
            };

            if column.kind.is_categorical() != expected.kind.is_categorical() {
                return Err(SessionError::State(format!(
                    "column '{}' of frame {} has a different type than model {} expects",
                    expected.name, frame.key, model.key
                )));
            }
        }

        Ok(())
    }

    /// Writes `model` to `dir` on the node's file system.
    ///
    /// # Returns
    /// The path of the written artifact, `dir/<model key>`.
    pub fn save<P: AsRef<Path>>(&mut self, model: &Model, dir: P) -> Result<PathBuf, SessionError> {
        self.registry.model(model)?;

        match self.call(Command::SaveModel {
            model: model.key().to_string(),
            dir: dir.as_ref().to_path_buf(),
        })? {
            Reply::Path(path) => {
                info!("saved {} to {}", model.key(), path.display());
                Ok(path)
            }
            other => Err(unexpected("path", &other)),
        }
    }

    /// Loads a model written by [`Session::save`].
    ///
    /// # Errors
    /// `SessionError::NotFound` if there is no artifact at `path`.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<Model, SessionError> {
        self.call_model(Command::LoadModel {
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Looks up a model on the node by key, including models created by other sessions.
    pub fn describe_model(&mut self, key: &str) -> Result<Model, SessionError> {
        self.call_model(Command::DescribeModel {
            key: key.to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    /// Deletes the object behind `handle` from the node, invalidating the handle.
    ///
    /// # Errors
    /// `SessionError::State` if the handle is no longer valid.
    pub fn remove<H: Handle>(&mut self, handle: &H) -> Result<(), SessionError> {
        let key = handle.key();
        if !self.registry.contains(key) {
            return Err(SessionError::State(format!(
                "handle '{key}' is no longer valid"
            )));
        }

        match self.call(Command::Remove {
            key: key.to_string(),
        })? {
            Reply::Ack => {
                self.registry.remove(key);
                debug!("removed {key}");
                Ok(())
            }
            other => Err(unexpected("ack", &other)),
        }
    }

    /// The frames created or looked up through this session.
    pub fn frames(&self) -> Vec<Frame> {
        self.registry.frames()
    }

    /// The models created or looked up through this session.
    pub fn models(&self) -> Vec<Model> {
        self.registry.models()
    }

    /// The keys of every frame and model on the node.
    pub fn list(&mut self) -> Result<(Vec<String>, Vec<String>), SessionError> {
        match self.call(Command::List)? {
            Reply::Listing { frames, models } => Ok((frames, models)),
            other => Err(unexpected("listing", &other)),
        }
    }

    /// Ends the session, invalidating every handle.
    ///
    /// Objects stay on the node for other sessions.
    pub fn close(mut self) -> Result<(), SessionError> {
        self.registry.clear();
        let reply = self.call(Command::Disconnect)?;
        self.runtime.block_on(self.conn.tx.shutdown())?;

        match reply {
            Reply::Ack => {
                info!("disconnected from {}", self.cluster.name);
                Ok(())
            }
            other => Err(unexpected("ack", &other)),
        }
    }

    // -------------------------------------------------------------------------
    // Calls
    // -------------------------------------------------------------------------

    fn call(&mut self, cmd: Command) -> Result<Reply, SessionError> {
        self.runtime.block_on(self.conn.call(cmd))
    }

    fn call_frame(&mut self, cmd: Command) -> Result<Frame, SessionError> {
        match self.call(cmd)? {
            Reply::Frame(meta) => Ok(self.registry.insert_frame(meta)),
            other => Err(unexpected("frame", &other)),
        }
    }

    fn call_model(&mut self, cmd: Command) -> Result<Model, SessionError> {
        match self.call(cmd)? {
            Reply::Model(meta) => Ok(self.registry.insert_model(*meta)),
            other => Err(unexpected("model", &other)),
        }
    }

    /// Creates a communication channel with the node through its network address.
    ///
    /// # Arguments
    /// * `addr` - The network address of the node.
    /// * `timeout` - The limit for establishing the connection and every later call.
    ///
    /// # Returns
    /// A communication channel or an error if failed to do so.
    async fn open_channel(
        addr: SocketAddr,
        timeout: Option<Duration>,
    ) -> Result<Connection, SessionError> {
        let stream = match timeout {
            Some(limit) => time::timeout(limit, TcpStream::connect(addr))
                .await
                .map_err(|_| SessionError::Timeout(limit))??,
            None => TcpStream::connect(addr).await?,
        };

        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);
        Ok(Connection {
            rx,
            tx,
            next_id: 0,
            timeout,
            broken: false,
        })
    }
}

fn unexpected(expected: &str, reply: &Reply) -> SessionError {
    SessionError::Protocol(format!(
        "expected a {expected} reply, got {}",
        reply.name()
    ))
}
