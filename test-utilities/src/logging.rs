#[ctor::ctor(anonymous)]
fn init_test_logger() {
    let _ = env_logger::builder()
        .parse_env(env_logger::Env::default().default_filter_or("info"))
        .format_level(true)
        .format_source_path(true)
        .format_module_path(false)
        .format_timestamp(None)
        // keep log lines apart from panic output on stderr
        .target(env_logger::Target::Stdout)
        .is_test(true)
        .try_init();
}
