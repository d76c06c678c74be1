fn main() -> anyhow::Result<()> {
    mood_diary::cli::run()
}
