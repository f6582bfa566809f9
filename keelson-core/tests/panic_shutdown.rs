//! A panic anywhere in the process triggers an emergency shutdown.
//!
//! Lives in its own test binary because it installs a process-wide panic hook.

use keelson_core::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_panic_triggers_emergency_shutdown() {
    let coordinator = ShutdownCoordinator::new(ShutdownConfig::default().timeout(Duration::from_secs(4)));
    let cleaned = Arc::new(AtomicBool::new(false));

    let flag = cleaned.clone();
    coordinator
        .register(ShutdownHandler::new("flush", move || {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        }))
        .unwrap();
    coordinator.trigger_on_panic().unwrap();

    let crashed = tokio::spawn(async {
        panic!("worker crashed");
    })
    .await;
    assert!(crashed.unwrap_err().is_panic());

    let report = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(report) = coordinator.report() {
                return report;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert!(report.emergency);
    assert_eq!(report.deadline, Duration::from_secs(2));
    assert!(report.success);
    assert!(cleaned.load(Ordering::SeqCst));
}
