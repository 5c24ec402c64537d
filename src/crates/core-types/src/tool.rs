use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Executing,
    AwaitingApproval,
    Approved,
    Denied,
    Completed,
    Error,
}

impl ToolStatus {
    /// Statuses after which the server will not run the call again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Denied)
    }

    /// Statuses in which a human decision can still change the outcome.
    pub fn is_awaiting_decision(self) -> bool {
        matches!(self, Self::Pending | Self::AwaitingApproval)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Snapshot of one tool invocation inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    #[serde(alias = "call_id")]
    pub call_id: String,
    #[serde(alias = "tool")]
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "args")]
    pub arguments: Value,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, alias = "requires_approval")]
    pub requires_approval: bool,
}

/// Partial tool execution as carried by a single stream event.
///
/// Every field except `call_id` is optional: only the fields an event actually
/// carries overwrite the stored snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionUpdate {
    #[serde(alias = "call_id")]
    pub call_id: String,
    #[serde(default, alias = "tool")]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "args")]
    pub arguments: Option<Value>,
    #[serde(default)]
    pub status: Option<ToolStatus>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "requires_approval")]
    pub requires_approval: Option<bool>,
}

impl ToolExecutionUpdate {
    pub fn with_status(call_id: impl Into<String>, status: ToolStatus) -> Self {
        Self {
            call_id: call_id.into(),
            status: Some(status),
            ..Default::default()
        }
    }
}

impl ToolExecution {
    /// Build a fresh snapshot from the first event seen for a call.
    pub fn from_update(update: &ToolExecutionUpdate, fallback_status: ToolStatus) -> Self {
        let mut execution = Self {
            call_id: update.call_id.clone(),
            name: String::new(),
            title: None,
            arguments: Value::Null,
            status: fallback_status,
            result: None,
            error: None,
            requires_approval: false,
        };
        execution.merge(update);
        execution
    }

    /// Last write wins per field. Fields absent from `update` are left untouched,
    /// so applying the same update twice is the same as applying it once.
    pub fn merge(&mut self, update: &ToolExecutionUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(title) = &update.title {
            self.title = Some(title.clone());
        }
        if let Some(arguments) = &update.arguments {
            self.arguments = arguments.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        if let Some(requires_approval) = update.requires_approval {
            self.requires_approval = requires_approval;
        }
    }

    /// True when a human approve/deny decision is still meaningful for this call.
    pub fn is_approvable(&self) -> bool {
        self.requires_approval && self.status.is_awaiting_decision()
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_keeps_fields_missing_from_update() {
        let pending = ToolExecutionUpdate {
            call_id: "c1".to_string(),
            name: Some("kubectl_get".to_string()),
            arguments: Some(json!({"namespace": "prod"})),
            status: Some(ToolStatus::Pending),
            requires_approval: Some(true),
            ..Default::default()
        };
        let mut execution = ToolExecution::from_update(&pending, ToolStatus::Pending);

        execution.merge(&ToolExecutionUpdate::with_status("c1", ToolStatus::AwaitingApproval));

        assert_eq!(execution.status, ToolStatus::AwaitingApproval);
        assert_eq!(execution.name, "kubectl_get");
        assert_eq!(execution.arguments, json!({"namespace": "prod"}));
        assert!(execution.requires_approval);
    }

    #[test]
    fn merge_is_idempotent() {
        let update = ToolExecutionUpdate {
            call_id: "c1".to_string(),
            name: Some("helm_list".to_string()),
            status: Some(ToolStatus::Executing),
            ..Default::default()
        };
        let mut once = ToolExecution::from_update(&update, ToolStatus::Executing);
        let snapshot = once.clone();
        once.merge(&update);
        assert_eq!(once, snapshot);
    }

    #[test]
    fn deserializes_wire_field_names() {
        let update: ToolExecutionUpdate = serde_json::from_value(json!({
            "call_id": "abc",
            "tool": "argo_sync",
            "title": "Sync app",
            "args": {"app": "web"},
            "requires_approval": true
        }))
        .unwrap();

        assert_eq!(update.call_id, "abc");
        assert_eq!(update.name.as_deref(), Some("argo_sync"));
        assert_eq!(update.arguments, Some(json!({"app": "web"})));
        assert_eq!(update.requires_approval, Some(true));
        assert_eq!(update.status, None);
    }

    #[test]
    fn approvable_requires_flag_and_open_status() {
        let mut execution = ToolExecution::from_update(
            &ToolExecutionUpdate {
                call_id: "c1".to_string(),
                requires_approval: Some(true),
                ..Default::default()
            },
            ToolStatus::Pending,
        );
        assert!(execution.is_approvable());

        execution.status = ToolStatus::Executing;
        assert!(!execution.is_approvable());

        execution.status = ToolStatus::AwaitingApproval;
        execution.requires_approval = false;
        assert!(!execution.is_approvable());
    }
}
