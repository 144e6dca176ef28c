//! Environment readiness check.

use crate::cli::output;
use crate::renderer::chromium::find_chromium;
use crate::settings::RuntimeSettings;
use anyhow::Result;
use serde::Serialize;
use shiptrace::CaptureConfig;

#[derive(Serialize)]
struct Check {
    name: &'static str,
    ok: bool,
    detail: String,
}

/// Check Chromium, capture configuration, page URL template and output directory.
pub async fn run() -> Result<bool> {
    let mut checks = Vec::new();

    let chromium = find_chromium();
    checks.push(Check {
        name: "chromium",
        ok: chromium.is_some(),
        detail: match &chromium {
            Some(path) => path.display().to_string(),
            None => "not found; set SHIPTRACE_CHROMIUM_PATH or install Chrome".to_string(),
        },
    });

    let capture = CaptureConfig::from_env().and_then(|c| c.request());
    checks.push(Check {
        name: "capture_config",
        ok: capture.is_ok(),
        detail: match &capture {
            Ok(request) => format!(
                "target={} strategies={:?} max_wait={}ms",
                request.target_url_substring,
                request.strategy_order,
                request.max_wait.as_millis()
            ),
            Err(e) => e.to_string(),
        },
    });

    let settings = RuntimeSettings::from_env();
    let sample = settings.page_url("TEST0000000", "AUTO");
    checks.push(Check {
        name: "page_url_template",
        ok: sample.is_ok(),
        detail: match &sample {
            Ok(url) => url.clone(),
            Err(e) => format!("{e:#}"),
        },
    });

    let writable = std::fs::create_dir_all(&settings.output_dir).and_then(|_| {
        let marker = settings.output_dir.join(".shiptrace-doctor");
        std::fs::write(&marker, b"ok")?;
        std::fs::remove_file(&marker)
    });
    checks.push(Check {
        name: "output_dir",
        ok: writable.is_ok(),
        detail: match &writable {
            Ok(()) => format!("{} is writable", settings.output_dir.display()),
            Err(e) => format!("{}: {e}", settings.output_dir.display()),
        },
    });

    let ready = checks.iter().all(|c| c.ok);

    if output::is_json() {
        output::print_json(&serde_json::json!({ "ready": ready, "checks": checks }));
    } else if !output::is_quiet() {
        println!("Shiptrace Doctor");
        println!("================");
        println!();
        println!("OS:   {}", std::env::consts::OS);
        println!("Arch: {}", std::env::consts::ARCH);
        println!();
        for check in &checks {
            let mark = if check.ok { "[OK]" } else { "[!!]" };
            println!("{mark} {}: {}", check.name, check.detail);
        }
        println!();
        println!("Status: {}", if ready { "READY" } else { "NOT READY" });
    }

    Ok(ready)
}
