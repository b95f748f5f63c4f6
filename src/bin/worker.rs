// Binary entry point for the queue worker process.

use vulx_core::config::{init_logging, WorkerConfig};
use vulx_core::worker::Worker;

#[tokio::main]
async fn main() {
    init_logging();

    let config = WorkerConfig::default();
    let mut worker = match Worker::connect(config).await {
        Ok(worker) => worker,
        Err(e) => {
            log::error!("failed to start worker: {e}");
            std::process::exit(1);
        }
    };

    worker.run().await;
}
