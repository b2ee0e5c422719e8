//! 플러그인 레지스트리 CLI
//!
//! ## 사용법
//! ```
//! plugin-registry list             # 카탈로그 + 설치 상태
//! plugin-registry list --json      # JSON 출력
//! plugin-registry refresh          # 캐시 무시하고 카탈로그 다시 받기
//! plugin-registry install <id>     # 설치
//! plugin-registry update <id>      # 업데이트
//! plugin-registry remove <id>      # 제거 (격리 디렉터리로 이동)
//! plugin-registry config           # 설정 표시
//! plugin-registry help             # 도움말
//! ```
//!
//! 실패 시 종료 코드 1

use anyhow::{bail, Context, Result};

use plugin_registry::app;
use plugin_registry::config::{config_file_path, load_registry_config, RegistryConfig};
use plugin_registry_lib::{EntryRow, RegistrySession, RegistrySnapshot};

fn main() {
    // stdout 은 JSON 출력용으로 비워둠
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Error: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };
    rt.block_on(async move {
        if let Err(e) = run(args).await {
            eprintln!("✗ Error: {:#}", e);
            std::process::exit(1);
        }
    });
}

async fn run(args: Vec<String>) -> Result<()> {
    let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    if args_ref.is_empty() || matches!(args_ref[0], "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    if matches!(args_ref[0], "--version" | "-V") {
        println!("plugin-registry {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let cfg = load_registry_config()?;

    match args_ref[0] {
        "list" => cmd_list(&cfg, &args_ref[1..]).await,
        "refresh" => cmd_refresh(&cfg).await,
        "install" => cmd_install(&cfg, &args_ref[1..], false).await,
        "update" => cmd_install(&cfg, &args_ref[1..], true).await,
        "remove" | "uninstall" => cmd_remove(&cfg, &args_ref[1..]).await,
        "config" => cmd_config(&cfg),
        other => {
            eprintln!("✗ Unknown command: {}", other);
            eprintln!("  Run 'plugin-registry help' for usage.");
            std::process::exit(1);
        }
    }
}

// ═══════════════════════════════════════════════════════
// 명령어 핸들러
// ═══════════════════════════════════════════════════════

/// 세션을 열고 카탈로그가 준비될 때까지 대기
async fn open_session(cfg: &RegistryConfig) -> Result<RegistrySession> {
    let (session, _host) = app::start(cfg);
    let mut rx = session.subscribe();
    session.open().await?;
    app::wait_for_catalog(&session, &mut rx).await?;
    Ok(session)
}

async fn cmd_list(cfg: &RegistryConfig, flags: &[&str]) -> Result<()> {
    let json_mode = flags.contains(&"--json");
    let session = open_session(cfg).await?;
    let snapshot = session.snapshot().await?;
    session.shutdown().await?;

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

async fn cmd_refresh(cfg: &RegistryConfig) -> Result<()> {
    let (session, _host) = app::start(cfg);
    let mut rx = session.subscribe();
    session.refresh().await?;
    let state = app::wait_for_catalog(&session, &mut rx).await?;
    let snapshot = session.snapshot().await?;
    session.shutdown().await?;

    println!(
        "✓ Catalog refreshed: {} plugin(s) ({})",
        snapshot.entries.len(),
        state.cache_file_path.display()
    );
    Ok(())
}

async fn cmd_install(cfg: &RegistryConfig, args: &[&str], update: bool) -> Result<()> {
    let id = match args.first() {
        Some(id) => *id,
        None => bail!("Usage: plugin-registry {} <id>", if update { "update" } else { "install" }),
    };

    let session = open_session(cfg).await?;
    let mut rx = session.subscribe();
    if update {
        session.update(id).await?;
    } else {
        session.install(id).await?;
    }
    println!("⏳ Downloading {}...", id);

    let outcome = app::wait_for_operation(&mut rx, id).await;
    session.shutdown().await?;

    match outcome {
        Ok(()) => {
            println!("✓ {} {}", id, if update { "updated" } else { "installed" });
            Ok(())
        }
        Err(report) => {
            eprintln!("  {}", report.user_message);
            bail!("{} ({})", report.message, report.error_code)
        }
    }
}

async fn cmd_remove(cfg: &RegistryConfig, args: &[&str]) -> Result<()> {
    let id = args
        .first()
        .copied()
        .context("Usage: plugin-registry remove <id>")?;

    let session = open_session(cfg).await?;
    let result = session.uninstall(id).await;
    session.shutdown().await?;

    let quarantined = result?;
    println!("✓ {} removed", id);
    println!("  Moved to {}", quarantined.display());
    Ok(())
}

fn cmd_config(cfg: &RegistryConfig) -> Result<()> {
    println!("# {}", config_file_path().display());
    println!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}

// ═══════════════════════════════════════════════════════
// 출력
// ═══════════════════════════════════════════════════════

fn action_label(row: &EntryRow) -> &'static str {
    let s = &row.state;
    if s.in_progress {
        "busy"
    } else if s.can_update {
        "update"
    } else if s.can_install {
        "install"
    } else if s.can_remove {
        "installed"
    } else {
        "-"
    }
}

fn print_snapshot(snapshot: &RegistrySnapshot) {
    println!("📋 Plugin Registry");
    println!("─────────────────────────────────────────────");
    println!(
        "  Last refresh: {}",
        snapshot.state.last_refreshed.as_deref().unwrap_or("never")
    );
    println!();

    if snapshot.entries.is_empty() {
        println!("  No plugins in catalog.");
        return;
    }

    println!(
        "  {:<20} {:<24} {:<10} {:<10} {}",
        "ID", "NAME", "VERSION", "INSTALLED", "STATUS"
    );
    for row in &snapshot.entries {
        println!(
            "  {:<20} {:<24} {:<10} {:<10} {}",
            row.entry.id,
            row.entry.name,
            if row.entry.version.is_empty() { "-" } else { &row.entry.version },
            row.state.installed_version.as_deref().unwrap_or("-"),
            action_label(row)
        );
    }
}

fn print_help() {
    println!("plugin-registry {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  plugin-registry <command> [args]");
    println!();
    println!("COMMANDS:");
    println!("  list [--json]     Show catalog entries and their install state");
    println!("  refresh           Fetch the catalog again, ignoring the cache");
    println!("  install <id>      Download, load and install a plugin");
    println!("  update <id>       Replace an installed plugin with the catalog version");
    println!("  remove <id>       Move an installed plugin to the quarantine directory");
    println!("  config            Show the effective configuration");
    println!("  help              Show this help");
    println!();
    println!("ENVIRONMENT:");
    println!("  PLUGIN_REGISTRY_CONFIG   Path to registry.toml");
    println!("  RUST_LOG                 Log filter (default: info)");
}
