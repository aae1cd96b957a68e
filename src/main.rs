use clap::Parser;
use llm_stdio::{
    config::AppConfig, engine::load_engine, init_debug_log_file, log_debug, log_file_path,
    protocol::StderrMessage, session,
};
use std::env;
use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    run_with_args(env::args_os())
}

fn run_with_args<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let config = match AppConfig::try_parse_from(args) {
        Ok(config) => config,
        Err(e) => {
            // Usage/help rendering is clap's; only the exit code is ours:
            // a missing config path must exit 1 per the process contract.
            let is_error = e.use_stderr();
            let _ = e.print();
            return if is_error {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_debug_log_file();
    log_debug("=== llm-stdio started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));

    let stderr = io::stderr();
    let mut err = stderr.lock();

    let mut engine = match config.validate().and_then(|()| load_engine(&config.config_path)) {
        Ok(engine) => engine,
        Err(e) => {
            session::emit(&mut err, &StderrMessage::error(&format!("无法创建LLM实例: {e:#}")));
            log_debug(&format!("engine init failed: {e:#}"));
            return ExitCode::FAILURE;
        }
    };

    session::emit(
        &mut err,
        &StderrMessage::status("ready", "LLM已初始化并准备接收请求"),
    );

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut state = session::SessionState::new();

    let result = session::run_loop(
        &mut input,
        &mut out,
        &mut err,
        engine.as_mut(),
        &mut state,
        config.stream_end_grace(),
    );

    log_debug("=== llm-stdio exiting ===");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_debug(&format!("dispatch loop failed: {e:#}"));
            session::emit(&mut err, &StderrMessage::error(&format!("{e:#}")));
            ExitCode::FAILURE
        }
    }
}
