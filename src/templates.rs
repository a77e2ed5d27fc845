//! # Saved command templates
//!
//! Reusable PowerShell snippets operators can browse and replay against a
//! fleet, with named parameter placeholders filled in at invocation time.

use crate::models::{CommandParameter, SavedCommandTemplate};

/// Seed templates installed into a fresh [`crate::store::InMemoryStore`].
pub fn default_templates() -> Vec<SavedCommandTemplate> {
    vec![
        SavedCommandTemplate {
            id: "sys-get-process".into(),
            name: "List processes".into(),
            description: "List the top processes by CPU usage".into(),
            category: "diagnostics".into(),
            command: "Get-Process | Sort-Object CPU -Descending | Select-Object -First 10".into(),
            parameters: vec![],
            tags: vec!["process".into(), "diagnostics".into()],
            version: "1.0".into(),
            author: "system".into(),
            is_system: true,
        },
        SavedCommandTemplate {
            id: "sys-restart-service".into(),
            name: "Restart service".into(),
            description: "Restart a named Windows service".into(),
            category: "services".into(),
            command: "Restart-Service -Name \"$Name\" -Force".into(),
            parameters: vec![CommandParameter {
                name: "Name".into(),
                param_type: "string".into(),
                default: None,
                required: true,
            }],
            tags: vec!["service".into()],
            version: "1.0".into(),
            author: "system".into(),
            is_system: true,
        },
        SavedCommandTemplate {
            id: "sys-system-info".into(),
            name: "System info".into(),
            description: "Get basic computer information".into(),
            category: "diagnostics".into(),
            command: "Get-ComputerInfo".into(),
            parameters: vec![],
            tags: vec!["system".into()],
            version: "1.0".into(),
            author: "system".into(),
            is_system: true,
        },
    ]
}

/// Substitute `$Name`-style placeholders in a template's command text with
/// caller-supplied parameter values. Unknown placeholders are left
/// untouched; missing required parameters are the caller's responsibility
/// to validate before invoking this.
pub fn render_template(template: &SavedCommandTemplate, values: &[(String, String)]) -> String {
    let mut rendered = template.command.clone();
    for (name, value) in values {
        rendered = rendered.replace(&format!("${name}"), value);
    }
    rendered
}
