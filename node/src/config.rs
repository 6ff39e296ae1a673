use std::{env, io, num::NonZeroUsize, thread};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 54321;

/// Runtime configuration of a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Upper bound of fits running at the same time.
    pub nthreads: NonZeroUsize,
    /// Memory budget for frames in bytes.
    pub max_mem: Option<u64>,
}

impl NodeConfig {
    /// A configuration listening on an ephemeral local port, used by tests and embedders.
    pub fn local() -> Self {
        Self {
            name: "local".into(),
            host: DEFAULT_HOST.into(),
            port: 0,
            nthreads: default_threads(),
            max_mem: None,
        }
    }

    /// Reads `HOST`, `PORT`, `NTHREADS`, `MAX_MEM` and `NODE_NAME` from the environment.
    ///
    /// # Errors
    /// Returns an `io::Error` of kind `InvalidInput` if a variable is set but malformed.
    pub fn from_env() -> io::Result<Self> {
        let mut config = Self {
            port: DEFAULT_PORT,
            ..Self::local()
        };

        if let Ok(name) = env::var("NODE_NAME") {
            config.name = name;
        }

        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }

        if let Some(port) = parse_var("PORT")? {
            config.port = port;
        }

        if let Some(nthreads) = parse_var::<usize>("NTHREADS")? {
            config.nthreads = NonZeroUsize::new(nthreads)
                .ok_or_else(|| invalid_input("NTHREADS must be greater than 0"))?;
        }

        config.max_mem = parse_var("MAX_MEM")?;
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_threads() -> NonZeroUsize {
    thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

fn parse_var<T: std::str::FromStr>(key: &str) -> io::Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid_input(&format!("{key} has an invalid value '{raw}'"))),
        Err(_) => Ok(None),
    }
}

fn invalid_input(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}
