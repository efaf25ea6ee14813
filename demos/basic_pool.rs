//! # Example: Basic Pool
//!
//! Three squaring jobs under a limit of two, one job that fails with exit code 3,
//! and one that overruns its execution limit and gets killed.
//!
//! ```bash
//! RUST_LOG=info cargo run --example basic_pool --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use procvisor::{
    Args, ExitCodeBehavior, LogWriter, ManagedProcess, Pool, PoolConfig, Subscribe, TaskError,
    TimeoutBehavior, WorkFn, WorkRef,
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

fn square() -> WorkRef {
    WorkFn::arc("square", |args: &Args| {
        let n = args.first().and_then(Value::as_i64).unwrap_or_default();
        std::thread::sleep(Duration::from_millis(300));
        Ok::<_, TaskError>(json!(n * n))
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = PoolConfig {
        limit: 2,
        dump_wait: Duration::from_millis(100),
        join_timeout: Duration::from_secs(2),
        ..PoolConfig::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let mut pool = Pool::builder(cfg)
        .with_timeout_behavior(TimeoutBehavior::Ignore)
        .with_exit_code_behavior(ExitCodeBehavior::Ignore)
        .with_subscribers(subs)
        .build()?;

    for n in 1..=3 {
        pool.submit(ManagedProcess::new(square(), vec![json!(n)]).with_id(format!("square-{n}")))?;
    }

    let exit3 = WorkFn::arc("exit3", |_: &Args| Err::<Value, _>(TaskError::Exit { code: 3 }));
    pool.submit(ManagedProcess::new(exit3, Vec::new()).with_id("exit3"))?;

    let slow = WorkFn::arc("slow", |_: &Args| {
        std::thread::sleep(Duration::from_secs(30));
        Ok::<_, TaskError>(Value::Null)
    });
    pool.submit(
        ManagedProcess::new(slow, Vec::new())
            .with_id("slow")
            .with_max_execution_time(Duration::from_secs(1)),
    )?;

    pool.join().await?;

    println!("status: {}", pool.status().as_label());
    let mut values: Vec<_> = pool.return_values().into_iter().collect();
    values.sort_by(|a, b| a.0.cmp(&b.0));
    for (id, value) in values {
        println!("{id:>10} => {value}");
    }
    for p in pool.failed_processes() {
        println!("{:>10} failed (exit code {:?})", p.id(), p.exit_code());
    }
    Ok(())
}
