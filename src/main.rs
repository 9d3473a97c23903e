use video_downloader_lib::Cli;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse_args();
    std::process::exit(video_downloader_lib::run(cli).await);
}
