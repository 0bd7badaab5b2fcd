//! Offload a function to a worker thread and run several calls at once.
//!
//! Run with:
//!   cargo run -p offload --example inline-sum
//!
//! The same function as a separate process:
//!   cargo run -p offload --features cli -- call sum 1 2 3

use std::time::Duration;

use offload::{async_fn, create_worker, NormalizedError};
use serde_json::{json, Value};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let worker = create_worker(async_fn(|args: Vec<Value>| async move {
        let delay = args.first().and_then(Value::as_u64).unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(delay)).await;
        let total: f64 = args.iter().filter_map(Value::as_f64).sum();
        Ok::<_, NormalizedError>(json!(total))
    }))?;

    // Issued in order, answered in whatever order the worker finishes.
    let slow = worker.execute(vec![json!(300), json!(1)]);
    let fast = worker.execute(vec![json!(10), json!(2)]);
    eprintln!("issued calls {:?} and {:?}", slow.id(), fast.id());

    eprintln!("fast: {}", fast.await?);
    eprintln!("slow: {}", slow.await?);

    worker.terminate();
    let after = worker.execute(vec![]).await;
    eprintln!("after terminate: {after:?}");
    Ok(())
}
