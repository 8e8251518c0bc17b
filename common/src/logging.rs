use env_logger::{Builder, Env};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// 初始化 env_logger；RUST_LOG 优先，其次使用配置中的级别。重复调用无副作用
pub fn init_logger(level: &str) {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    let env = Env::default().default_filter_or(level.to_string());
    let result = Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
    if result.is_err() {
        // 其他 logger 已经注册（例如测试框架），保持原样
        log::debug!("logger already installed");
    }
}

/// 日志里的 id 缩写
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
