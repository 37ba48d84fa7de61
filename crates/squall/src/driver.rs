//! Worker fan-out: partition the planned scenario runs across worker tasks,
//! run them, and kill the process the instant the last one finishes.
//!
//! Termination is deliberately abrupt. In-flight connections belong to
//! workers that are still mid-scenario when the counter hits the target;
//! they are abandoned to the OS along with every connection the finished
//! scenarios leaked on purpose.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::{debug, info};

use crate::scenario::{Params, Scenario};
use crate::transport::Dialer;

pub struct RunPlan {
    /// total scenario runs across all workers
    pub total: u64,
    /// worker task count
    pub threads: usize,
    /// sleep before each worker starts and between runs within a worker
    pub conn_delay: Duration,
}

/// Per-worker allotments: `total / threads` each, with the first
/// `total % threads` workers taking one extra.
pub fn split(total: u64, threads: usize) -> Vec<u64> {
    let threads = threads.max(1);
    let per_worker = total / threads as u64;
    let remainder = (total % threads as u64) as usize;
    (0..threads)
        .map(|i| per_worker + u64::from(i < remainder))
        .collect()
}

/// Spawn the workers and park until one of them exits the process. Each
/// worker runs its allotment sequentially; every run counts toward the
/// total whether it completed, was filtered at dial time, or died
/// mid-emission.
pub async fn run(plan: RunPlan, scenario: Scenario, dialer: Arc<Dialer>, params: Arc<Params>) {
    if plan.total == 0 {
        info!("nothing to do");
        return;
    }

    let finished = Arc::new(AtomicU64::new(0));

    for (cid, allotment) in split(plan.total, plan.threads).into_iter().enumerate() {
        if !plan.conn_delay.is_zero() {
            tokio::time::sleep(plan.conn_delay).await;
        }

        let finished = finished.clone();
        let dialer = dialer.clone();
        let params = params.clone();
        let total = plan.total;
        let conn_delay = plan.conn_delay;

        tokio::spawn(async move {
            for _ in 0..allotment {
                if let Err(e) = scenario.run(cid, &dialer, &params).await {
                    debug!(cid, scenario = scenario.name(), "scenario ended early: {e}");
                }

                let done = finished.fetch_add(1, Ordering::AcqRel) + 1;
                if done == total {
                    info!("all {total} runs finished, stopping");
                    std::process::exit(0);
                }

                if !conn_delay.is_zero() {
                    tokio::time::sleep(conn_delay).await;
                }
            }
        });
    }

    // workers never join; the process exits from whichever worker finishes
    // the last run
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_spreads_remainder_over_first_workers() {
        assert_eq!(split(10, 4), vec![3, 3, 2, 2]);
        assert_eq!(split(9, 3), vec![3, 3, 3]);
        assert_eq!(split(1, 1), vec![1]);
    }

    #[test]
    fn split_with_more_workers_than_runs() {
        // excess workers get an allotment of zero and terminate cleanly
        assert_eq!(split(2, 5), vec![1, 1, 0, 0, 0]);
        assert_eq!(split(0, 3), vec![0, 0, 0]);
    }

    #[test]
    fn split_totals_are_preserved() {
        for total in 0..50u64 {
            for threads in 1..8 {
                assert_eq!(split(total, threads).iter().sum::<u64>(), total);
            }
        }
    }
}
