//! Doctor command - validate configuration and show status

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::args::DoctorArgs;
use crate::config::AppConfig;

#[derive(Debug, Serialize)]
struct DoctorReport {
    config: CheckResult,
    tiktok: CheckResult,
    telegram: CheckResult,
    media: CheckResult,
    ffmpeg: CheckResult,
    overall: String,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: "warn".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    fn is_error(&self) -> bool {
        self.status == "error"
    }
}

pub async fn execute(args: DoctorArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut report = DoctorReport {
        config: CheckResult::error("Not checked"),
        tiktok: CheckResult::error("Not checked"),
        telegram: CheckResult::error("Not checked"),
        media: CheckResult::error("Not checked"),
        ffmpeg: CheckResult::error("Not checked"),
        overall: "error".to_string(),
    };

    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(c) => {
            report.config = check_required(&c);
            Some(c)
        }
        Err(e) => {
            report.config = CheckResult::error(format!("Failed to load config: {}", e));
            None
        }
    };

    if let Some(ref config) = config {
        report.tiktok = check_tiktok(config);
        report.telegram = check_telegram(config);
        report.media = check_media_dir(&config.general.media_dir);
        report.ffmpeg = check_ffmpeg(&config.media.ffmpeg_command);
    }

    let checks = [
        &report.config,
        &report.tiktok,
        &report.telegram,
        &report.media,
        &report.ffmpeg,
    ];

    let has_error = checks.iter().any(|c| c.is_error());
    let all_ok = checks.iter().all(|c| c.is_ok());

    report.overall = if has_error {
        "error".to_string()
    } else if all_ok {
        "ok".to_string()
    } else {
        "warn".to_string()
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.overall == "error" {
        std::process::exit(1);
    }

    Ok(())
}

fn check_required(config: &AppConfig) -> CheckResult {
    let missing = config.missing_required();
    if missing.is_empty() {
        CheckResult::ok("Configuration loaded successfully")
    } else {
        CheckResult::error(format!(
            "Missing required configuration: {}",
            missing.join(", ")
        ))
        .with_details(serde_json::json!({ "missing": missing }))
    }
}

/// Status of a secret env var without revealing its value
fn env_status(env_var: &str) -> Option<bool> {
    if env_var.trim().is_empty() {
        return None;
    }
    Some(matches!(std::env::var(env_var), Ok(v) if !v.trim().is_empty()))
}

fn describe(env_var: &str, set: bool) -> String {
    format!("{} ({})", env_var, if set { "set" } else { "not set" })
}

fn check_tiktok(config: &AppConfig) -> CheckResult {
    let tiktok = &config.tiktok;

    let (Some(cookie), Some(device)) = (
        env_status(&tiktok.cookie_env),
        env_status(&tiktok.device_id_env),
    ) else {
        return CheckResult::error("Cookie or device id env var not configured");
    };

    let sec_uid = if tiktok.sec_uid.is_empty() {
        "resolved at startup"
    } else {
        "configured"
    };
    let message = format!(
        "User: {}, secUid: {}, Cookie: {}, Device id: {}",
        tiktok.username,
        sec_uid,
        describe(&tiktok.cookie_env, cookie),
        describe(&tiktok.device_id_env, device)
    );

    let details = serde_json::json!({
        "base_url": tiktok.base_url,
        "page_size": tiktok.page_size,
        "probe_item_id": tiktok.probe_item_id,
    });

    if cookie && device {
        CheckResult::ok(message).with_details(details)
    } else {
        CheckResult::warn(message).with_details(details)
    }
}

fn check_telegram(config: &AppConfig) -> CheckResult {
    let telegram = &config.telegram;

    let Some(token) = env_status(&telegram.bot_token_env) else {
        return CheckResult::error("No bot token env var configured");
    };

    let message = format!(
        "Channel: {}, Scratch chat: {}, Bot token: {}",
        telegram.channel_id,
        telegram.scratch_chat_id,
        describe(&telegram.bot_token_env, token)
    );

    if token {
        CheckResult::ok(message)
    } else {
        CheckResult::warn(message)
    }
}

fn check_media_dir(dir: &Path) -> CheckResult {
    if dir.is_dir() {
        CheckResult::ok(format!("Media dir: {}", dir.display()))
    } else if dir.exists() {
        CheckResult::error(format!("Media dir is not a directory: {}", dir.display()))
    } else {
        CheckResult::warn(format!(
            "Media dir does not exist yet, it is created on first download: {}",
            dir.display()
        ))
    }
}

fn check_ffmpeg(command: &str) -> CheckResult {
    let command = command.trim();
    if command.is_empty() {
        return CheckResult::ok("Audio tagging disabled");
    }

    if command_exists(command) {
        CheckResult::ok(format!("Command: {}", command))
    } else {
        CheckResult::warn(format!(
            "Command not found on PATH, audio will be posted untagged: {}",
            command
        ))
    }
}

fn command_exists(command: &str) -> bool {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return path.is_file();
    }

    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };

    std::env::split_paths(&paths).any(|dir| dir.join(command).is_file())
}

fn print_report(report: &DoctorReport) {
    println!("tikdog Doctor Report");
    println!("====================");
    println!();

    print_check("Config", &report.config);
    print_check("TikTok", &report.tiktok);
    print_check("Telegram", &report.telegram);
    print_check("Media", &report.media);
    print_check("ffmpeg", &report.ffmpeg);

    println!();
    let symbol = match report.overall.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} Overall: {}", symbol, report.overall.to_uppercase());

    if report.overall == "ok" {
        println!();
        println!("Ready to run! Try: tikdog run --dry-run --once");
    }
}

fn print_check(name: &str, result: &CheckResult) {
    let symbol = match result.status.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} {}: {}", symbol, name, result.message);
}
