//! Microphone access gate.

use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Unrequested,
    Pending,
    Granted,
    Denied,
}

/// Platform microphone permission. `request` never blocks; the answer
/// arrives on the returned receiver.
pub trait MicrophonePermission: Send + Sync {
    fn status(&self) -> PermissionStatus;
    fn request(&self) -> oneshot::Receiver<bool>;
}

/// Linux has no microphone permission model, access is always granted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPermissionModel;

impl MicrophonePermission for NoPermissionModel {
    fn status(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    fn request(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(true);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_permission_model_grants() {
        let permission = NoPermissionModel;
        assert_eq!(permission.status(), PermissionStatus::Granted);
        assert!(permission.request().await.unwrap());
    }
}
