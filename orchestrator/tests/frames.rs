mod common;

use std::{collections::BTreeSet, net::TcpListener, num::NonZeroUsize, thread, time::Duration};

use comms::{
    Serialize,
    msg::{Msg, Reply},
    specs::cluster::ClusterInfo,
};
use orchestrator::{
    Column, ColumnKind, FrameData, Handle, ImportOptions, Session, SessionError, SessionOptions,
};
use tempfile::TempDir;
use tokio::{io::AsyncWriteExt, runtime::Runtime, time};

use common::{numbered_rows, numbers, session, spawn_node, write_csv};

#[test]
fn import_infers_column_types() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "ten.csv", &common::ten_rows());

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();

    assert_eq!(frame.key(), "ten.hex");
    assert_eq!(frame.rows(), 10);
    assert_eq!(frame.column("x").unwrap().kind, ColumnKind::Numeric);
    assert_eq!(
        frame.column("label").unwrap().kind.levels(),
        &["a".to_string(), "b".to_string()]
    );
}

#[test]
fn forced_categorical_columns() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "numbered.csv", &numbered_rows(5));

    let mut session = session();
    let frame = session
        .import_dataset_with(
            &path,
            ImportOptions {
                destination: Some("numbered".into()),
                categorical: vec!["id".into()],
            },
        )
        .unwrap();

    assert_eq!(frame.key(), "numbered");
    assert!(frame.column("id").unwrap().kind.is_categorical());
    assert!(!frame.column("value").unwrap().kind.is_categorical());
}

#[test]
fn missing_path_is_not_found() {
    let mut session = session();
    let err = session.import_dataset("/no/such/dir/data.csv").unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)), "{err}");
}

#[test]
fn split_partitions_every_row_once() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "numbered.csv", &numbered_rows(100));

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();
    let parts = session.split(&frame, &[0.6, 0.2], 7).unwrap();

    assert_eq!(parts.len(), 3);
    assert_eq!(
        parts.iter().map(|p| p.rows()).collect::<Vec<_>>(),
        vec![60, 20, 20]
    );

    let mut seen = Vec::new();
    for part in &parts {
        let ids = numbers(&session.fetch(part).unwrap(), "id");
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "rows lost their order");
        seen.extend(ids);
    }

    seen.sort_by(f64::total_cmp);
    let expected: Vec<f64> = (0..100).map(f64::from).collect();
    assert_eq!(seen, expected);
}

#[test]
fn split_is_deterministic_for_a_seed() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "numbered.csv", &numbered_rows(50));

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();

    let mut ids = |seed| {
        let parts = session.split(&frame, &[0.5], seed).unwrap();
        numbers(&session.fetch(&parts[0]).unwrap(), "id")
    };

    let first = ids(11);
    assert_eq!(first, ids(11));
    assert_ne!(first, ids(12));
}

#[test]
fn split_of_the_whole_frame_leaves_an_empty_remainder() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "numbered.csv", &numbered_rows(8));

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();
    let parts = session.split(&frame, &[0.5, 0.5], 1).unwrap();

    assert_eq!(
        parts.iter().map(|p| p.rows()).collect::<Vec<_>>(),
        vec![4, 4, 0]
    );
}

#[test]
fn malformed_ratios_are_rejected_locally() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "numbered.csv", &numbered_rows(10));

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();

    for ratios in [&[0.7, 0.5][..], &[0.0], &[], &[-0.1], &[1.5]] {
        let err = session.split(&frame, ratios, 0).unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)), "{ratios:?}: {err}");
    }

    let (frames, _) = session.list().unwrap();
    assert_eq!(frames, vec![frame.key().to_string()]);
}

#[test]
fn removed_handles_are_invalid() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "numbered.csv", &numbered_rows(10));

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();
    session.remove(&frame).unwrap();

    assert!(matches!(
        session.split(&frame, &[0.5], 0),
        Err(SessionError::State(_))
    ));
    assert!(matches!(session.fetch(&frame), Err(SessionError::State(_))));
    assert!(matches!(session.remove(&frame), Err(SessionError::State(_))));
    assert!(session.frames().is_empty());

    let (frames, models) = session.list().unwrap();
    assert!(frames.is_empty() && models.is_empty());
}

#[test]
fn upload_head_and_as_factor() {
    let data = FrameData::new(vec![
        Column::numeric("x", vec![Some(1.0), Some(2.0), None, Some(4.0)]),
        Column::numeric("cls", vec![Some(0.0), Some(1.0), Some(1.0), Some(0.0)]),
    ]);

    let mut session = session();
    let frame = session.upload(Some("inline"), data.clone()).unwrap();
    assert_eq!(frame.rows(), 4);
    assert_eq!(session.fetch(&frame).unwrap(), data);
    assert_eq!(session.head(&frame, 2).unwrap().nrows(), 2);

    let factored = session.as_factor(&frame, "cls").unwrap();
    assert_ne!(factored.key(), frame.key());
    assert_eq!(
        factored.column("cls").unwrap().kind.levels(),
        &["0".to_string(), "1".to_string()]
    );

    let err = session.as_factor(&frame, "nope").unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
}

#[test]
fn malformed_uploads_are_rejected() {
    let data = FrameData::new(vec![
        Column::numeric("x", vec![Some(1.0)]),
        Column::numeric("y", vec![Some(1.0), Some(2.0)]),
    ]);

    let mut session = session();
    let err = session.upload(None, data).unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
}

#[test]
fn frames_are_shared_between_sessions() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "numbered.csv", &numbered_rows(3));
    let addr = spawn_node();

    let mut first = Session::connect(addr).unwrap();
    let frame = first.import_dataset(&path).unwrap();

    let mut second = Session::connect(addr).unwrap();
    let seen = second.describe_frame(frame.key()).unwrap();
    assert_eq!(seen, frame);

    first.close().unwrap();
    let keys: BTreeSet<String> = second.list().unwrap().0.into_iter().collect();
    assert!(keys.contains(frame.key()));
}

#[test]
fn resource_mismatch_is_not_an_error() {
    let options = SessionOptions {
        nthreads: std::num::NonZeroUsize::new(1024),
        max_mem: Some(1),
        timeout: Some(Duration::from_secs(10)),
    };

    let session = Session::connect_with(spawn_node(), options).unwrap();
    assert!(!session.cluster().name.is_empty());
    session.close().unwrap();
}

#[test]
fn closed_port_is_a_connection_error() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let err = orchestrator::connect(addr, None, None).err().unwrap();
    assert!(matches!(err, SessionError::Connection(_)), "{err}");
}

#[test]
fn silent_node_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let options = SessionOptions {
        timeout: Some(Duration::from_millis(200)),
        ..Default::default()
    };

    let err = Session::connect_with(listener.local_addr().unwrap(), options)
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Timeout(_)), "{err}");
}

fn wire(msg: &Msg) -> Vec<u8> {
    let mut body = Vec::new();
    msg.serialize(&mut body).unwrap();

    let mut bytes = (body.len() as u64).to_be_bytes().to_vec();
    bytes.extend(body);
    bytes
}

fn listing(id: u64, frame: &str) -> Vec<u8> {
    wire(&Msg::Reply {
        id,
        reply: Reply::Listing {
            frames: vec![frame.into()],
            models: vec![],
        },
    })
}

async fn handshake<R, W>(rx: &mut comms::OnoReceiver<R>, tx: &mut W)
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let Msg::Control { id, .. } = rx.recv().await.unwrap() else {
        panic!("expected the handshake");
    };
    let info = ClusterInfo {
        name: "fake".into(),
        version: "0".into(),
        nthreads: NonZeroUsize::MIN,
        max_mem: None,
        frames: 0,
        models: 0,
    };
    let reply = Msg::Reply {
        id,
        reply: Reply::Cluster(info),
    };
    tx.write_all(&wire(&reply)).await.unwrap();
}

/// Answers the handshake, then sends the first listing in two pieces with a pause between them.
fn slow_node(listener: TcpListener) {
    let runtime = Runtime::new().unwrap();
    runtime.block_on(async move {
        listener.set_nonblocking(true).unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (rx, mut tx) = stream.into_split();
        let (mut rx, _) = comms::channel(rx, tokio::io::sink());

        handshake(&mut rx, &mut tx).await;

        let Msg::Control { id, .. } = rx.recv().await.unwrap() else {
            panic!("expected a request");
        };
        let late = listing(id, "late");
        tx.write_all(&late[..12]).await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        tx.write_all(&late[12..]).await.unwrap();

        let Msg::Control { id, .. } = rx.recv().await.unwrap() else {
            panic!("expected a request");
        };
        tx.write_all(&listing(id, "fresh")).await.unwrap();

        let _ = rx.recv::<Msg>().await;
    });
}

#[test]
fn half_sent_answer_does_not_break_the_session() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || slow_node(listener));

    let options = SessionOptions {
        timeout: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let mut session = Session::connect_with(addr, options).unwrap();

    let err = session.list().unwrap_err();
    assert!(matches!(err, SessionError::Timeout(_)), "{err}");

    session.set_timeout(Some(Duration::from_secs(5)));
    let (frames, _) = session.list().unwrap();
    assert_eq!(frames, vec!["fresh"]);
}

/// Answers the handshake and then stops reading.
fn deaf_node(listener: TcpListener) {
    let runtime = Runtime::new().unwrap();
    runtime.block_on(async move {
        listener.set_nonblocking(true).unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (rx, mut tx) = stream.into_split();
        let (mut rx, _) = comms::channel(rx, tokio::io::sink());

        handshake(&mut rx, &mut tx).await;
        time::sleep(Duration::from_secs(10)).await;
    });
}

#[test]
fn interrupted_request_breaks_the_session() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || deaf_node(listener));

    let options = SessionOptions {
        timeout: Some(Duration::from_millis(300)),
        ..Default::default()
    };
    let mut session = Session::connect_with(addr, options).unwrap();

    let big = FrameData::new(vec![Column::numeric(
        "x",
        (0..4_000_000).map(|i| Some(i as f64 + 0.25)).collect(),
    )]);
    let err = session.upload(Some("big"), big).unwrap_err();
    assert!(matches!(err, SessionError::Timeout(_)), "{err}");

    let err = session.list().unwrap_err();
    assert!(matches!(err, SessionError::Connection(_)), "{err}");
}
