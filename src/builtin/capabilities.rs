//! The bundled capability manifest.
//!
//! Every variant is listed here explicitly and registered by
//! [`register_builtin`] at startup. Bodies are embedded at compile time so the
//! catalog export always carries the exact source that runs.

use crate::catalog::{
    CapabilityBody, CapabilityMetadata, CapabilityRegistry, Registration, RegisteredCapability,
    VerificationPayload,
};
use crate::platform::PlatformKey;
use anyhow::{Context, Result};
use serde_json::json;

const UNIX: [&str; 2] = [PlatformKey::LINUX, PlatformKey::DARWIN];

/// Every bundled capability variant, in registration order.
pub fn manifest() -> Vec<RegisteredCapability> {
    vec![
        add_number(),
        create_folder(),
        list_folder_unix(),
        list_folder_windows(),
        get_current_time_unix(),
        get_current_time_windows(),
        send_http_request(),
        ignore(),
        mouse_move(),
    ]
}

/// Register the whole manifest into `registry`.
pub fn register_builtin(registry: &mut CapabilityRegistry) -> Result<Vec<Registration>> {
    manifest()
        .into_iter()
        .map(|capability| {
            let name = capability.name().to_string();
            registry
                .register(capability)
                .with_context(|| format!("registering built-in capability '{name}'"))
        })
        .collect()
}

/// A registry holding only the bundled capabilities.
pub fn builtin_registry() -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    register_builtin(&mut registry)?;
    Ok(registry)
}

fn add_number() -> RegisteredCapability {
    RegisteredCapability::new(
        CapabilityMetadata::new("add number")
            .description("Add two integers and return their sum.")
            .input_schema(json!({
                "a": {"type": "integer", "description": "First addend."},
                "b": {"type": "integer", "description": "Second addend."}
            }))
            .output_schema(json!({
                "result": {"type": "integer", "description": "a + b"}
            }))
            .verification(VerificationPayload::new().with("input", json!({"a": 7, "b": 5}))),
        CapabilityBody::from_static(include_str!("../../capabilities/add_number.sh")),
    )
}

fn create_folder() -> RegisteredCapability {
    RegisteredCapability::new(
        CapabilityMetadata::new("create folder")
            .description("Create a folder (and missing parents) inside a directory.")
            .platforms(UNIX)
            .input_schema(json!({
                "path": {"type": "string", "description": "Parent directory."},
                "folder_name": {"type": "string", "description": "Name of the folder to create."}
            }))
            .output_schema(json!({
                "status": {"type": "string", "enum": ["success", "error"]},
                "path": {"type": "string", "description": "Physical path of the folder."},
                "message": {"type": "string"}
            }))
            .requirements(["mkdir", "sed"])
            .verification(VerificationPayload::new()),
        CapabilityBody::from_static(include_str!("../../capabilities/create_folder.sh")),
    )
}

fn list_folder_metadata() -> CapabilityMetadata {
    CapabilityMetadata::new("list folder")
        .description("List the entries of a directory, hidden ones included.")
        .input_schema(json!({
            "path": {"type": "string", "description": "Directory to list."}
        }))
        .output_schema(json!({
            "status": {"type": "string", "enum": ["success", "error"]},
            "contents": {"type": "array", "items": {"type": "string"}},
            "message": {"type": "string"}
        }))
        .verification(VerificationPayload::new())
}

fn list_folder_unix() -> RegisteredCapability {
    RegisteredCapability::new(
        list_folder_metadata()
            .platforms(UNIX)
            .requirements(["basename", "sed"]),
        CapabilityBody::from_static(include_str!("../../capabilities/list_folder.sh")),
    )
}

fn list_folder_windows() -> RegisteredCapability {
    RegisteredCapability::new(
        list_folder_metadata().platforms([PlatformKey::WINDOWS]),
        CapabilityBody::from_static(include_str!("../../capabilities/list_folder.ps1")),
    )
}

fn get_current_time_metadata() -> CapabilityMetadata {
    CapabilityMetadata::new("get current time")
        .description("Report the local date and time as YYYY-MM-DD HH:MM:SS.")
        .output_schema(json!({
            "time": {"type": "string", "description": "Local timestamp."}
        }))
        .verification(VerificationPayload::new())
}

fn get_current_time_unix() -> RegisteredCapability {
    RegisteredCapability::new(
        get_current_time_metadata().requirements(["date"]),
        CapabilityBody::from_static(include_str!("../../capabilities/get_current_time.sh")),
    )
}

fn get_current_time_windows() -> RegisteredCapability {
    RegisteredCapability::new(
        get_current_time_metadata().platforms([PlatformKey::WINDOWS]),
        CapabilityBody::from_static(include_str!("../../capabilities/get_current_time.ps1")),
    )
}

fn send_http_request() -> RegisteredCapability {
    RegisteredCapability::new(
        CapabilityMetadata::new("send http request")
            .description("Send one HTTP request and report the status code and final URL.")
            .platforms(UNIX)
            .input_schema(json!({
                "method": {"type": "string", "default": "GET"},
                "url": {"type": "string"},
                "timeout": {"type": "integer", "default": 30},
                "body": {"type": "string", "description": "Optional request body."}
            }))
            .output_schema(json!({
                "status": {"type": "string", "enum": ["success", "error"]},
                "status_code": {"type": "integer"},
                "final_url": {"type": "string"},
                "response_bytes": {"type": "integer"},
                "message": {"type": "string"}
            }))
            .requirements(["curl", "mktemp", "sed", "wc"])
            .verification(VerificationPayload::new().with("network", "stubbed")),
        CapabilityBody::from_static(include_str!("../../capabilities/send_http_request.sh")),
    )
}

fn ignore() -> RegisteredCapability {
    RegisteredCapability::new(
        CapabilityMetadata::new("ignore")
            .description("Acknowledge an event without acting on it.")
            .output_schema(json!({
                "status": {"type": "string"},
                "message": {"type": "string"}
            })),
        CapabilityBody::from_static(include_str!("../../capabilities/ignore.sh")),
    )
}

fn mouse_move() -> RegisteredCapability {
    RegisteredCapability::new(
        CapabilityMetadata::new("mouse move")
            .description("Move the mouse pointer to absolute screen coordinates.")
            .platforms([PlatformKey::LINUX])
            .input_schema(json!({
                "x": {"type": "integer"},
                "y": {"type": "integer"}
            }))
            .output_schema(json!({
                "status": {"type": "string"},
                "x": {"type": "integer"},
                "y": {"type": "integer"}
            }))
            .requirements(["xdotool"])
            .verification(VerificationPayload::new().with("simulated_mode", false)),
        CapabilityBody::from_static(include_str!("../../capabilities/mouse_move.sh")),
    )
}
