use std::process::ExitCode;
use strmsync_lib::config::{resolve_data_dir, AppConfig};
use strmsync_lib::logging::init_logging;
use strmsync_lib::AppState;

const USAGE: &str = "用法: strmsync [--target <id>] [--help]

  --target <id>   只运行指定的同步目标（默认运行全部）
  --help          显示帮助

数据目录: 环境变量 STRMSYNC_DATA_DIR，或默认配置目录下的 strmsync/";

enum Command {
    Run(Option<i64>),
    Help,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Command, String> {
    let mut target = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--target" | "-t" => {
                let value = args.next().ok_or("--target 需要一个参数")?;
                let id = value
                    .parse::<i64>()
                    .map_err(|_| format!("无效的同步目标 ID: {}", value))?;
                target = Some(id);
            }
            other => return Err(format!("未知参数: {}", other)),
        }
    }
    Ok(Command::Run(target))
}

#[tokio::main]
async fn main() -> ExitCode {
    let target = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Run(target)) => target,
        Ok(Command::Help) => {
            println!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    let data_dir = match resolve_data_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("无法创建数据目录: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let config = match AppConfig::load(&data_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let _guard = init_logging(&data_dir, &config.log);
    tracing::info!("数据目录: {:?}", data_dir);

    let state = match AppState::open(&data_dir, config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("初始化失败: {}", e);
            eprintln!("初始化失败: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let targets: Vec<i64> = match target {
        Some(id) => vec![id],
        None => state.config.sync_targets.iter().map(|t| t.id).collect(),
    };
    if targets.is_empty() {
        tracing::warn!("没有配置同步目标");
    }

    // Ctrl-C 取消所有运行
    let signal_state = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("收到中断信号，取消同步");
            let running: Vec<i64> = signal_state.cancels.lock().await.keys().copied().collect();
            for id in running {
                signal_state.cancel_target(id).await;
            }
        }
    });

    let mut failed = 0;
    for id in targets {
        match state.run_target(id).await {
            Ok(outcome) => {
                let succeeded = outcome.succeeded();
                let (run, report) = outcome.wait().await;
                if !succeeded {
                    failed += 1;
                }
                println!(
                    "target {}: {} (STRM {}, 元数据 {}, 上传 {}, 文件 {}){}",
                    id,
                    run.status,
                    run.new_strm,
                    run.new_meta,
                    run.new_upload,
                    run.total,
                    run.reason.map(|r| format!(" - {}", r)).unwrap_or_default()
                );
                if let Some(report) = report {
                    tracing::debug!("target {} 对账: {:?}", id, report);
                }
            }
            Err(e) => {
                failed += 1;
                tracing::error!("target {} 运行失败: {}", id, e);
                eprintln!("target {}: {}", id, e);
            }
        }
    }

    state.cleanup().await;
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        assert!(matches!(parse_args(args(&[])), Ok(Command::Run(None))));
        assert!(matches!(parse_args(args(&["--target", "3"])), Ok(Command::Run(Some(3)))));
        assert!(matches!(parse_args(args(&["--help"])), Ok(Command::Help)));
        assert!(parse_args(args(&["--target"])).is_err());
        assert!(parse_args(args(&["--target", "x"])).is_err());
        assert!(parse_args(args(&["--bogus"])).is_err());
    }
}
