//! Periodic queue sweep.
//!
//! Picks up due pending jobs that no task in this process is handling, for
//! example jobs whose retry timer was lost to a restart.

use std::time::Duration;

use tokio::task::JoinHandle;

use super::JobScheduler;

pub struct QueueSweeper {
    scheduler: JobScheduler,
    interval: Duration,
    batch_size: u32,
}

impl QueueSweeper {
    pub fn new(scheduler: JobScheduler, interval: Duration, batch_size: u32) -> Self {
        Self {
            scheduler,
            interval,
            batch_size,
        }
    }

    /// Runs one sweep immediately. Returns the number of dispatches started.
    pub fn sweep(&self) -> usize {
        match self.scheduler.dispatch_due(self.batch_size) {
            Ok(started) => {
                if started > 0 {
                    log::info!("Queue sweep dispatched {} jobs", started);
                }
                started
            }
            Err(e) => {
                log::error!("Queue sweep failed: {}", e);
                0
            }
        }
    }

    /// Starts the sweep loop on the current runtime. The loop ends when the
    /// scheduler shuts down.
    pub fn start(self) -> JoinHandle<()> {
        let mut shutdown = self.scheduler.subscribe_shutdown();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(self.interval);
            interval_timer.tick().await; // skip immediate first tick

            loop {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    _ = interval_timer.tick() => {},
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                self.sweep();
            }

            log::info!("Queue sweeper stopped");
        })
    }
}
