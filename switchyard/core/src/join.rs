//! Helpers for the `tokio::spawn` isolation boundary.

use tokio::task::{AbortHandle, JoinError};

/// Aborts a spawned task when dropped, so the task does not outlive a
/// caller that stopped waiting for it
pub(crate) struct AbortOnDrop(pub(crate) AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Describe why a spawned call did not return normally
pub(crate) fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "task was cancelled".to_string();
    }

    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panic_message_is_extracted() {
        let err = tokio::spawn(async { panic!("kaboom") }).await.unwrap_err();
        assert_eq!(join_error_message(err), "panicked: kaboom");

        let err = tokio::spawn(async { panic!("{}", String::from("formatted")) })
            .await
            .unwrap_err();
        assert_eq!(join_error_message(err), "panicked: formatted");
    }

    #[tokio::test]
    async fn test_guard_aborts_on_drop() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        drop(AbortOnDrop(handle.abort_handle()));
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_task() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        handle.abort();
        let err = handle.await.unwrap_err();
        assert_eq!(join_error_message(err), "task was cancelled");
    }
}
