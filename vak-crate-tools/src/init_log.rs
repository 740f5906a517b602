use std::io::Write;

/// 安装全局 logger
///
/// 默认级别为 Info，可以通过 `RUST_LOG` 覆盖，例如 `RUST_LOG=vak_gfx=debug`
pub fn init_log() {
    if let Err(e) = try_init_log() {
        eprintln!("logger already initialized: {e}");
    }
}

/// 同 [`init_log`]，重复安装时返回错误而不是打印
pub fn try_init_log() -> Result<(), log::SetLoggerError> {
    env_logger::Builder::new()
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => info_style.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
                log::Level::Error => info_style.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
                _ => buf.default_level_style(record.level()),
            };
            let location_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let message_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            // windows 和 unix 的路径分隔符都要处理
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {location_style}[{file}:{line}]{location_style:#} \
                 {message_style}{}{message_style:#}",
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_default_env()
        .try_init()
}
