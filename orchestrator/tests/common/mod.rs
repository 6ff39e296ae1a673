#![allow(dead_code)]

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
};

use node::{Node, NodeConfig};
use orchestrator::{ColumnData, FrameData, Session};
use tokio::runtime::Runtime;

/// Starts a node on an ephemeral port in a background thread.
pub fn spawn_node() -> SocketAddr {
    let (addr_tx, addr_rx) = mpsc::channel();

    thread::spawn(move || {
        let runtime = Runtime::new().unwrap();
        runtime.block_on(async move {
            let node = Node::bind(NodeConfig::local()).await.unwrap();
            addr_tx.send(node.local_addr().unwrap()).unwrap();
            node.run().await.unwrap();
        });
    });

    addr_rx.recv().unwrap()
}

pub fn session() -> Session {
    Session::connect(spawn_node()).unwrap()
}

pub fn write_csv(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// Two well separated classes over two numeric features.
pub fn ten_rows() -> String {
    let mut csv = String::from("x,y,label\n");
    for i in 0..10 {
        let (offset, label) = if i % 2 == 0 { (0.0, "a") } else { (10.0, "b") };
        csv.push_str(&format!("{},{},{label}\n", offset + i as f64 * 0.1, offset - 1.0));
    }
    csv
}

/// A noiseless linear target over two features.
pub fn linear_rows(n: usize) -> String {
    let mut csv = String::from("x1,x2,target\n");
    for i in 0..n {
        let x1 = i as f64 / 4.0;
        let x2 = ((i * 7) % 10) as f64;
        csv.push_str(&format!("{x1},{x2},{}\n", 2.0 * x1 - x2 + 0.5));
    }
    csv
}

/// An `id` column counting from zero, handy to follow rows across splits.
pub fn numbered_rows(n: usize) -> String {
    let mut csv = String::from("id,value\n");
    for i in 0..n {
        csv.push_str(&format!("{i},{}\n", i * i));
    }
    csv
}

pub fn numbers(data: &FrameData, column: &str) -> Vec<f64> {
    let column = data.column(column).unwrap();
    let ColumnData::Numeric(values) = &column.data else {
        panic!("column '{}' is not numeric", column.name);
    };
    values.iter().map(|v| v.unwrap()).collect()
}

pub fn labels(data: &FrameData, column: &str) -> Vec<String> {
    let column = data.column(column).unwrap();
    (0..column.data.len())
        .map(|row| column.data.label(row).unwrap().to_string())
        .collect()
}
