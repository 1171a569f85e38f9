use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use feedline_config::{AppConfig, LogFormat};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

/// 收到关闭信号后等待各组件退出的上限
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("feedline")
        .version(env!("CARGO_PKG_VERSION"))
        .about("社交网络后端：动态扇出、实时推送与聊天Saga")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时按默认位置查找"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["queue", "gateway", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mode: AppMode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all")
        .parse()?;

    let config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<默认位置>")))?;

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.logging.level.clone());
    let log_format = match matches.get_one::<String>("log-format") {
        Some(format) => format.parse::<LogFormat>().map_err(anyhow::Error::msg)?,
        None => config.logging.format,
    };
    init_logging(&log_level, log_format)?;

    info!("启动 feedline");
    info!("运行模式: {:?}", mode);

    let app = Arc::new(Application::new(config, mode).await?);
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe();
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        result = &mut app_handle => {
            // 组件自行退出时不再等待信号
            match result {
                Ok(Ok(())) => info!("应用已退出"),
                Ok(Err(e)) => error!("应用运行失败: {e:#}"),
                Err(e) => error!("应用任务异常: {e}"),
            }
            shutdown_manager.shutdown().await;
            return Ok(());
        }
    }

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(DRAIN_TIMEOUT, app_handle).await {
        Ok(Ok(Ok(()))) => info!("应用已优雅关闭"),
        Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {e:#}"),
        Ok(Err(e)) => error!("应用任务异常: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("feedline 已退出");
    Ok(())
}

/// 初始化日志系统，`RUST_LOG` 优先于命令行和配置
fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
    }

    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
