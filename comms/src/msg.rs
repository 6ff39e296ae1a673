use std::{fmt, io, path::PathBuf};

use serde::{Deserialize as De, Serialize as Ser};

use crate::{
    Deserialize, Serialize,
    specs::{
        cluster::{ClusterInfo, ClusterSpec},
        frame::{FrameData, FrameMeta},
        metrics::MetricsSummary,
        model::{ModelMeta, TrainSpec},
    },
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const REPLY_H: Header = 2;

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, Ser, De)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Connect(ClusterSpec),
    ImportFile {
        path: PathBuf,
        destination: Option<String>,
        #[serde(default)]
        categorical: Vec<String>,
    },
    Upload {
        destination: Option<String>,
        data: FrameData,
    },
    AsFactor {
        frame: String,
        column: String,
    },
    Split {
        frame: String,
        ratios: Vec<f64>,
        seed: u64,
    },
    Train(TrainSpec),
    Predict {
        model: String,
        frame: String,
    },
    Performance {
        model: String,
        frame: String,
    },
    SaveModel {
        model: String,
        dir: PathBuf,
    },
    LoadModel {
        path: PathBuf,
    },
    DescribeFrame {
        key: String,
    },
    DescribeModel {
        key: String,
    },
    Fetch {
        frame: String,
        limit: Option<usize>,
    },
    Remove {
        key: String,
    },
    List,
    Disconnect,
}

impl Command {
    /// A short name for the command, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect(_) => "connect",
            Command::ImportFile { .. } => "import_file",
            Command::Upload { .. } => "upload",
            Command::AsFactor { .. } => "as_factor",
            Command::Split { .. } => "split",
            Command::Train(_) => "train",
            Command::Predict { .. } => "predict",
            Command::Performance { .. } => "performance",
            Command::SaveModel { .. } => "save_model",
            Command::LoadModel { .. } => "load_model",
            Command::DescribeFrame { .. } => "describe_frame",
            Command::DescribeModel { .. } => "describe_model",
            Command::Fetch { .. } => "fetch",
            Command::Remove { .. } => "remove",
            Command::List => "list",
            Command::Disconnect => "disconnect",
        }
    }
}

/// The node's answer to a successful `Command`.
#[derive(Debug, Clone, Ser, De)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Cluster(ClusterInfo),
    Frame(FrameMeta),
    Frames(Vec<FrameMeta>),
    Model(Box<ModelMeta>),
    Metrics(MetricsSummary),
    Path(PathBuf),
    Data(FrameData),
    Listing {
        frames: Vec<String>,
        models: Vec<String>,
    },
    Ack,
}

impl Reply {
    /// A short name for the reply, used for error reporting.
    pub fn name(&self) -> &'static str {
        match self {
            Reply::Cluster(_) => "cluster",
            Reply::Frame(_) => "frame",
            Reply::Frames(_) => "frames",
            Reply::Model(_) => "model",
            Reply::Metrics(_) => "metrics",
            Reply::Path(_) => "path",
            Reply::Data(_) => "data",
            Reply::Listing { .. } => "listing",
            Reply::Ack => "ack",
        }
    }
}

/// The category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ser, De)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    NotFound,
    Invalid,
    State,
    Internal,
}

/// An error reply, tied to the request that caused it when there is one.
#[derive(Debug, Clone, Ser, De)]
pub struct Fault {
    pub id: Option<u64>,
    pub kind: FaultKind,
    pub detail: String,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// The application layer message for the entire system.
#[derive(Debug, Clone)]
pub enum Msg {
    Control { id: u64, cmd: Command },
    Reply { id: u64, reply: Reply },
    Err(Fault),
}

#[derive(Ser, De)]
struct Envelope<T> {
    id: u64,
    body: T,
}

impl Msg {
    /// The request id this message belongs to, if any.
    pub fn id(&self) -> Option<u64> {
        match self {
            Msg::Control { id, .. } | Msg::Reply { id, .. } => Some(*id),
            Msg::Err(fault) => fault.id,
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl Serialize for Msg {
    fn serialize(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        match self {
            Msg::Err(fault) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                serde_json::to_writer(buf, fault)?;
            }
            Msg::Control { id, cmd } => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());
                let env = Envelope { id: *id, body: cmd };
                serde_json::to_writer(buf, &env)?;
            }
            Msg::Reply { id, reply } => {
                buf.extend_from_slice(&REPLY_H.to_be_bytes());
                let env = Envelope { id: *id, body: reply };
                serde_json::to_writer(buf, &env)?;
            }
        }

        Ok(())
    }
}

impl Deserialize for Msg {
    fn deserialize(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let mut header = [0; HEADER_SIZE];
        header.copy_from_slice(kind_buf);

        match Header::from_be_bytes(header) {
            ERR_H => Ok(Self::Err(serde_json::from_slice(rest)?)),
            CONTROL_H => {
                let Envelope { id, body } = serde_json::from_slice(rest)?;
                Ok(Self::Control { id, cmd: body })
            }
            REPLY_H => {
                let Envelope { id, body } = serde_json::from_slice(rest)?;
                Ok(Self::Reply { id, reply: body })
            }
            kind => Self::invalid_kind(kind),
        }
    }
}
