fn main() -> anyhow::Result<()> {
    jsgi_dispatch::cli::run_cli()
}
