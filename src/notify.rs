use crate::bitrise::{BuildRecord, BuildStatus};

fn summary(build: &BuildRecord) -> (&'static str, String) {
    let summary = match build.status {
        BuildStatus::Success => "Build passed",
        BuildStatus::Failed => "Build failed",
        BuildStatus::AbortedWithFailure | BuildStatus::AbortedWithSuccess => "Build aborted",
        BuildStatus::NotFinished | BuildStatus::Unknown(_) => "Build finished",
    };
    let mut body = format!("#{} {}", build.build_number, build.triggered_workflow);
    if let Some(git_ref) = build.git_ref_label() {
        body.push_str(&format!(" ({git_ref})"));
    }
    (summary, body)
}

/// Shows a desktop notification for a finished build. Returns an error message
/// for the status bar when the notification daemon refuses it.
#[cfg(feature = "desktop-notify")]
pub fn send_desktop(build: &BuildRecord) -> Option<String> {
    use notify_rust::{Notification, Urgency};

    let (summary, body) = summary(build);
    let (icon, urgency) = match build.status {
        BuildStatus::Failed | BuildStatus::AbortedWithFailure => {
            ("dialog-error", Urgency::Critical)
        }
        _ => ("dialog-information", Urgency::Normal),
    };

    match Notification::new()
        .summary(summary)
        .body(&body)
        .icon(icon)
        .urgency(urgency)
        .show()
    {
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("desktop notification failed: {e}");
            Some(format!("Desktop notification failed: {e}"))
        }
    }
}

#[cfg(not(feature = "desktop-notify"))]
pub fn send_desktop(build: &BuildRecord) -> Option<String> {
    let (summary, body) = summary(build);
    tracing::debug!("desktop notifications disabled: {summary}: {body}");
    None
}
