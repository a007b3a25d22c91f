use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::chat::{PendingPermission, PermissionReply, UiUpdate};
use crate::config::{ConfigStore, PermissionPattern};
use crate::tools::gate::{PermissionChecker, PermissionRequest};
use crate::tools::shell::SHELL_TOOL_NAME;

/// Suspends the gate call on a channel round-trip to the chat front-end.
/// An approving reply may carry an always-allow upgrade, which is persisted
/// before the gate resumes.
pub struct InteractivePermissionChecker {
    updates: mpsc::UnboundedSender<UiUpdate>,
    store: Arc<ConfigStore>,
}

impl InteractivePermissionChecker {
    pub fn new(updates: mpsc::UnboundedSender<UiUpdate>, store: Arc<ConfigStore>) -> Self {
        Self { updates, store }
    }

    fn persist_upgrade(&self, request: &PermissionRequest, reply: &PermissionReply) {
        let mut pattern = PermissionPattern {
            tool: request.tool.clone(),
            ..PermissionPattern::default()
        };
        if reply.always_tool {
            pattern.always_allow = true;
        } else if reply.always_command && request.tool == SHELL_TOOL_NAME {
            match request
                .target
                .as_deref()
                .and_then(|t| t.split_whitespace().next())
            {
                Some(word) => pattern.command_pattern = word.to_string(),
                None => pattern.always_allow = true,
            }
        } else if reply.always_path {
            match request.target.as_deref() {
                Some(target) if !target.is_empty() => pattern.path_pattern = target.to_string(),
                _ => return,
            }
        } else {
            return;
        }
        if let Err(e) = self.store.update(|c| {
            c.add_always_allow_pattern(pattern);
        }) {
            eprintln!("WARN: failed to save permission pattern: {e}");
        }
    }
}

#[async_trait]
impl PermissionChecker for InteractivePermissionChecker {
    async fn request_permission(&self, request: PermissionRequest) -> anyhow::Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.updates
            .send(UiUpdate::PermissionPrompt(PendingPermission {
                request: request.clone(),
                reply: tx,
            }))
            .map_err(|_| anyhow!("chat front-end is no longer listening"))?;
        let reply = rx
            .await
            .map_err(|_| anyhow!("permission prompt was dismissed"))?;
        if reply.approved {
            self.persist_upgrade(&request, &reply);
        }
        Ok(reply.approved)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;
    use tokio::sync::mpsc;

    use super::InteractivePermissionChecker;
    use crate::chat::{PermissionReply, UiUpdate};
    use crate::config::ConfigStore;
    use crate::tools::gate::{PermissionChecker, PermissionLevel, PermissionRequest};

    fn request(tool: &str, target: Option<&str>) -> PermissionRequest {
        PermissionRequest {
            tool: tool.to_string(),
            level: PermissionLevel::Execute,
            details: "Args: {}".to_string(),
            target: target.map(|t| t.to_string()),
        }
    }

    async fn round_trip(
        reply: PermissionReply,
        req: PermissionRequest,
    ) -> (bool, Arc<ConfigStore>) {
        let tmp = tempdir().expect("tempdir");
        let store = Arc::new(ConfigStore::load_or_create(tmp.path()).expect("store"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let checker = InteractivePermissionChecker::new(tx, Arc::clone(&store));

        let responder = tokio::spawn(async move {
            match rx.recv().await {
                Some(UiUpdate::PermissionPrompt(pending)) => {
                    let _ = pending.reply.send(reply);
                }
                _ => panic!("expected a permission prompt"),
            }
        });
        let approved = checker.request_permission(req).await.expect("request");
        responder.await.expect("responder");
        (approved, store)
    }

    #[tokio::test]
    async fn deny_returns_false_without_persisting() {
        let (approved, store) =
            round_trip(PermissionReply::deny(), request("write_file", Some("a.txt"))).await;
        assert!(!approved);
        assert!(store.snapshot().permissions.always_allow_patterns.is_empty());
    }

    #[tokio::test]
    async fn approve_once_does_not_persist() {
        let (approved, store) = round_trip(
            PermissionReply::approve_once(),
            request("write_file", Some("a.txt")),
        )
        .await;
        assert!(approved);
        assert!(store.snapshot().permissions.always_allow_patterns.is_empty());
    }

    #[tokio::test]
    async fn always_command_persists_first_word() {
        let reply = PermissionReply {
            approved: true,
            always_command: true,
            ..PermissionReply::default()
        };
        let (approved, store) =
            round_trip(reply, request("run_command", Some("git push origin"))).await;
        assert!(approved);
        let patterns = store.snapshot().permissions.always_allow_patterns;
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].tool, "run_command");
        assert_eq!(patterns[0].command_pattern, "git");
        assert!(!patterns[0].always_allow);
    }

    #[tokio::test]
    async fn always_path_persists_target() {
        let reply = PermissionReply {
            approved: true,
            always_path: true,
            ..PermissionReply::default()
        };
        let (approved, store) = round_trip(reply, request("write_file", Some("docs/out.md"))).await;
        assert!(approved);
        let patterns = store.snapshot().permissions.always_allow_patterns;
        assert_eq!(patterns[0].path_pattern, "docs/out.md");
    }

    #[tokio::test]
    async fn always_tool_persists_unrestricted_pattern() {
        let reply = PermissionReply {
            approved: true,
            always_tool: true,
            ..PermissionReply::default()
        };
        let (approved, store) = round_trip(reply, request("web_fetch", None)).await;
        assert!(approved);
        let patterns = store.snapshot().permissions.always_allow_patterns;
        assert!(patterns[0].always_allow);
    }

    #[tokio::test]
    async fn dismissed_prompt_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        let store = Arc::new(ConfigStore::load_or_create(tmp.path()).expect("store"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let checker = InteractivePermissionChecker::new(tx, store);
        let dropper = tokio::spawn(async move {
            match rx.recv().await {
                Some(UiUpdate::PermissionPrompt(pending)) => drop(pending.reply),
                _ => panic!("expected a permission prompt"),
            }
        });
        let err = checker
            .request_permission(request("write_file", None))
            .await
            .expect_err("dismissed");
        dropper.await.expect("dropper");
        assert!(err.to_string().contains("dismissed"));
    }
}
