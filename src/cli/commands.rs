use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use time::macros::format_description;
use time::OffsetDateTime;
use unicode_width::UnicodeWidthStr;

use crate::config::{AppConfig, ConfigPaths, ENV_REMOTE_ANON_KEY, ENV_REMOTE_URL};
use crate::content;
use crate::highlight::Highlighter;
use crate::journaling::{AutoSaveEvent, AutoSaveRuntime};
use crate::model::{Book, BookColor, DiaryEntry, Mood, MOOD_TABLE};
use crate::remote::{RemoteClient, RemoteError, Session, SessionStore, SignUpOutcome};
use crate::repository::{
    filter_by_book, BookFilter, BookRepository, LocalBookRepository, Repositories,
};
use crate::search::{build_regex, long_date, parse_query, regex_pattern_from_input, EntryMatcher};
use crate::storage::StorageHandle;
use crate::sync::{self, SyncOutcome};
use crate::trends;

const HIGHLIGHT_OPEN: &str = "\u{1b}[1;33m";
const HIGHLIGHT_CLOSE: &str = "\u{1b}[0m";
const MOOD_COLUMN: usize = 11;
const DATE_COLUMN: usize = 18;

#[derive(Args, Debug, Clone)]
pub struct EntryArgs {
    #[command(subcommand)]
    pub command: EntryCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum EntryCommand {
    /// Write a new entry
    New(EntryNewArgs),
    /// Change an existing entry's content, mood or book
    Edit(EntryEditArgs),
    /// Print one entry in full
    Show(EntryIdArgs),
    /// List entries, newest first
    List(EntryListArgs),
    /// Delete an entry
    Delete(EntryIdArgs),
    /// Find entries by text, book, mood or date
    Search(EntrySearchArgs),
    /// List unsaved edits kept for recovery
    Drafts,
}

#[derive(Args, Debug, Clone)]
pub struct EntryNewArgs {
    /// Entry text. If omitted, reads from stdin.
    #[arg(long)]
    pub content: Option<String>,
    /// Mood as a code (1-5) or label
    #[arg(long)]
    pub mood: Option<Mood>,
    /// Book id or name (defaults to the current book)
    #[arg(long)]
    pub book: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EntryEditArgs {
    pub id: String,
    /// Replacement text; `-` reads it from stdin
    #[arg(long)]
    pub content: Option<String>,
    #[arg(long, conflicts_with = "clear_mood")]
    pub mood: Option<Mood>,
    #[arg(long)]
    pub clear_mood: bool,
    /// Move the entry into this book (id or name)
    #[arg(long, conflicts_with = "unfile")]
    pub book: Option<String>,
    /// Take the entry out of its book
    #[arg(long)]
    pub unfile: bool,
    /// Drop unsaved changes left over from an earlier edit instead of restoring them
    #[arg(long)]
    pub discard_draft: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EntryIdArgs {
    pub id: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EntryListArgs {
    /// Only entries in this book (id or name)
    #[arg(long, conflicts_with_all = ["unfiled", "all"])]
    pub book: Option<String>,
    /// Only entries without a book
    #[arg(long, conflicts_with = "all")]
    pub unfiled: bool,
    /// Ignore the current book selection
    #[arg(long)]
    pub all: bool,
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct EntrySearchArgs {
    /// Search terms (supports book:, mood:, date:YYYY-MM-DD[..YYYY-MM-DD] filters)
    #[arg(required = true)]
    pub query: Vec<String>,
    /// Treat the non-filter part of the query as a regular expression
    #[arg(long)]
    pub regex: bool,
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct BookArgs {
    #[command(subcommand)]
    pub command: BookCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum BookCommand {
    /// Create a book
    Create(BookCreateArgs),
    /// List books with entry counts
    List,
    /// Delete a book; its entries become unfiled
    Delete(BookKeyArgs),
    /// Select the book new entries go into (`all` clears the selection)
    Use(BookKeyArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BookCreateArgs {
    pub name: String,
    /// Colour name (e.g. `teal`) or hex value from the palette
    #[arg(long)]
    pub color: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BookKeyArgs {
    /// Book id or name
    pub book: String,
}

#[derive(Args, Debug, Clone)]
pub struct MoodArgs {
    #[command(subcommand)]
    pub command: MoodCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum MoodCommand {
    /// Record a mood check-in
    Record(MoodRecordArgs),
    /// List recorded check-ins
    List(MoodListArgs),
    /// Summarise moods over recent days
    Trend(MoodTrendArgs),
    /// Print the mood scale
    Scale,
}

#[derive(Args, Debug, Clone)]
pub struct MoodRecordArgs {
    /// Code (1-5) or label
    pub mood: Mood,
    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct MoodListArgs {
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct MoodTrendArgs {
    #[arg(long)]
    pub days: Option<u32>,
    /// Leave moods attached to diary entries out of the trend
    #[arg(long)]
    pub no_entries: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AuthCommand {
    /// Sign in; the first sign-in pushes local entries to the cloud
    Login(CredentialArgs),
    /// Create an account
    Signup(CredentialArgs),
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct CredentialArgs {
    pub email: String,
    /// Prompted for if omitted
    #[arg(long)]
    pub password: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum BackupCommand {
    /// Write a backup now
    Create,
    /// List backups written so far
    List,
}

/// Everything a command needs: loaded config, resolved paths and the open
/// on-device store.
pub struct CommandContext {
    pub config: Arc<AppConfig>,
    pub paths: ConfigPaths,
    pub storage: StorageHandle,
}

impl CommandContext {
    pub fn new(config: Arc<AppConfig>, paths: ConfigPaths, storage: StorageHandle) -> Self {
        Self {
            config,
            paths,
            storage,
        }
    }

    fn remote(&self) -> Result<Option<RemoteClient>> {
        Ok(RemoteClient::from_config(&self.config.remote)?)
    }

    fn require_remote(&self) -> Result<RemoteClient> {
        self.remote()?
            .ok_or(RemoteError::NotConfigured)
            .with_context(|| format!("set {ENV_REMOTE_URL} and {ENV_REMOTE_ANON_KEY} to use cloud storage"))
    }

    fn sessions(&self) -> SessionStore {
        SessionStore::new(self.storage.clone())
    }

    fn repositories(&self) -> Result<Repositories> {
        let session = self.sessions().current()?;
        let remote = self.remote()?;
        Ok(Repositories::select(&self.storage, remote, session.as_ref()))
    }

    fn local_books(&self) -> LocalBookRepository {
        LocalBookRepository::new(self.storage.clone())
    }
}

pub fn handle_entry_command(ctx: &CommandContext, args: EntryArgs) -> Result<()> {
    let output = match args.command {
        EntryCommand::New(args) => new_entry(ctx, args)?,
        EntryCommand::Edit(args) => edit_entry(ctx, args)?,
        EntryCommand::Show(args) => show_entry(ctx, &args.id)?,
        EntryCommand::List(args) => list_entries(ctx, &args)?,
        EntryCommand::Delete(args) => delete_entry(ctx, &args.id)?,
        EntryCommand::Search(args) => {
            let markers = atty::is(atty::Stream::Stdout).then_some((HIGHLIGHT_OPEN, HIGHLIGHT_CLOSE));
            run_search(ctx, &args, markers)?
        }
        EntryCommand::Drafts => list_drafts(ctx)?,
    };
    print!("{output}");
    Ok(())
}

pub fn handle_book_command(ctx: &CommandContext, args: BookArgs) -> Result<()> {
    let output = match args.command {
        BookCommand::Create(args) => create_book(ctx, args)?,
        BookCommand::List => list_books(ctx)?,
        BookCommand::Delete(args) => delete_book(ctx, &args.book)?,
        BookCommand::Use(args) => use_book(ctx, &args.book)?,
    };
    print!("{output}");
    Ok(())
}

pub fn handle_mood_command(ctx: &CommandContext, args: MoodArgs) -> Result<()> {
    let output = match args.command {
        MoodCommand::Record(args) => record_mood(ctx, args)?,
        MoodCommand::List(args) => list_moods(ctx, &args)?,
        MoodCommand::Trend(args) => mood_trend(ctx, &args, OffsetDateTime::now_utc())?,
        MoodCommand::Scale => mood_scale(),
    };
    print!("{output}");
    Ok(())
}

pub fn handle_auth_command(ctx: &CommandContext, args: AuthArgs) -> Result<()> {
    let output = match args.command {
        AuthCommand::Login(args) => login(ctx, args)?,
        AuthCommand::Signup(args) => signup(ctx, args)?,
        AuthCommand::Logout => logout(ctx)?,
        AuthCommand::Status => auth_status(ctx)?,
    };
    print!("{output}");
    Ok(())
}

pub fn handle_backup_command(ctx: &CommandContext, args: BackupArgs) -> Result<()> {
    let output = match args.command {
        BackupCommand::Create => {
            let record = ctx.storage.backup_to(&ctx.config.storage.backup_dir)?;
            format!("Backup written to {}\n", record.path.display())
        }
        BackupCommand::List => list_backups(ctx)?,
    };
    print!("{output}");
    Ok(())
}

pub fn sync_now(ctx: &CommandContext) -> Result<()> {
    print!("{}", run_sync(ctx)?);
    Ok(())
}

pub fn show_status(ctx: &CommandContext) -> Result<()> {
    print!("{}", status_report(ctx)?);
    Ok(())
}

fn new_entry(ctx: &CommandContext, args: EntryNewArgs) -> Result<String> {
    let content = match args.content {
        Some(content) => content,
        None => match read_stdin()? {
            Some(content) => content,
            None => prompt("Entry")?,
        },
    };
    let repos = ctx.repositories()?;
    let book = match &args.book {
        Some(key) => Some(resolve_book(repos.books.as_ref(), key)?),
        None => ctx.local_books().current_book()?,
    };

    let entry = DiaryEntry::new(book.as_ref().map(|b| b.id.clone()))
        .with_content(content.trim_end())
        .with_mood(args.mood);
    let saved = repos
        .entries
        .save(&entry)
        .context("saving new entry")?;

    let mut out = format!("Saved entry {} ({})", saved.id, repos.entries.kind());
    if let Some(book) = book {
        let _ = write!(out, " in {}", book.name);
    }
    out.push('\n');
    Ok(out)
}

fn edit_entry(ctx: &CommandContext, args: EntryEditArgs) -> Result<String> {
    let repos = ctx.repositories()?;
    let entry = repos
        .entries
        .get(&args.id)?
        .with_context(|| format!("entry {} not found", args.id))?;
    let content = match args.content.as_deref() {
        Some("-") => Some(read_stdin()?.unwrap_or_default()),
        Some(content) => Some(content.to_string()),
        None => None,
    };
    let book_change = match (&args.book, args.unfile) {
        (Some(key), _) => Some(Some(resolve_book(repos.books.as_ref(), key)?.id)),
        (None, true) => Some(None),
        (None, false) => None,
    };

    let mut runtime = AutoSaveRuntime::new(ctx.paths.autosave_dir(), &ctx.config.auto_save)?;
    if let Some(retention) = ctx.config.auto_save.snapshot_retention() {
        runtime.prune_snapshots(retention)?;
    }

    let mut out = String::new();
    if args.discard_draft && runtime.discard_snapshot(&args.id)? {
        let _ = writeln!(out, "Discarded unsaved changes to entry {}", args.id);
    }
    if let Some(snapshot) = runtime.start_session(entry)? {
        let _ = writeln!(
            out,
            "Recovered unsaved changes from {}",
            format_timestamp(snapshot.saved_at)
        );
    }
    let id = args.id.as_str();
    if let Some(content) = content {
        runtime.update_buffer(id, content.trim_end())?;
    }
    if args.mood.is_some() || args.clear_mood {
        let mood = args.mood;
        runtime.amend(id, |entry| {
            if entry.mood == mood {
                return false;
            }
            entry.mood = mood;
            true
        })?;
    }
    if let Some(book_id) = book_change {
        runtime.amend(id, |entry| {
            if entry.book_id == book_id {
                return false;
            }
            entry.book_id = book_id;
            true
        })?;
    }

    let polled = runtime.poll(repos.entries.as_ref())?;
    let closed = runtime.end_session(repos.entries.as_ref())?;
    match closed.or(polled) {
        Some(AutoSaveEvent::Saved { entry, .. }) => {
            let _ = writeln!(out, "Saved entry {} ({})", entry.id, repos.entries.kind());
        }
        Some(AutoSaveEvent::Error { entry_id, message }) => {
            bail!("could not save entry {entry_id}: {message} (changes kept for recovery)");
        }
        None => {
            let _ = writeln!(out, "No changes to entry {id}");
        }
    }
    Ok(out)
}

fn show_entry(ctx: &CommandContext, id: &str) -> Result<String> {
    let repos = ctx.repositories()?;
    let entry = repos
        .entries
        .get(id)?
        .with_context(|| format!("entry {id} not found"))?;
    let books = repos.books.list()?;

    let mut out = String::new();
    notice_line(&mut out, repos.entries.take_notice());
    let _ = writeln!(out, "{}  {}", long_date(entry.date), format_time(entry.date));
    let _ = writeln!(out, "mood   {}", mood_cell(entry.mood));
    let _ = writeln!(out, "book   {}", book_cell(&entry, &book_names(&books)));
    let _ = writeln!(out, "chars  {}", content::character_count(&entry.content));
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", content::plain_text(&entry.content));
    Ok(out)
}

fn list_entries(ctx: &CommandContext, args: &EntryListArgs) -> Result<String> {
    let repos = ctx.repositories()?;
    let filter = if args.unfiled {
        BookFilter::Unfiled
    } else if let Some(key) = &args.book {
        BookFilter::Book(resolve_book(repos.books.as_ref(), key)?.id)
    } else if args.all {
        BookFilter::All
    } else {
        match ctx.local_books().current_book()? {
            Some(book) => BookFilter::Book(book.id),
            None => BookFilter::All,
        }
    };

    let limit = args.limit.unwrap_or(ctx.config.display.list_limit);
    let entries = filter_by_book(repos.entries.list()?, &filter);
    let names = book_names(&repos.books.list()?);

    let mut out = String::new();
    notice_line(&mut out, repos.entries.take_notice());
    if entries.is_empty() {
        out.push_str("No entries yet.\n");
        return Ok(out);
    }
    for entry in entries.iter().take(limit) {
        out.push_str(&format_entry(
            entry,
            &names,
            ctx.config.display.preview_chars,
            None,
        ));
    }
    if entries.len() > limit {
        let _ = writeln!(out, "... {} more", entries.len() - limit);
    }
    Ok(out)
}

fn delete_entry(ctx: &CommandContext, id: &str) -> Result<String> {
    let repos = ctx.repositories()?;
    if !repos
        .entries
        .delete(id)
        .with_context(|| format!("deleting entry {id}"))?
    {
        bail!("entry {id} not found");
    }
    Ok(format!("Deleted entry {id}\n"))
}

fn run_search(
    ctx: &CommandContext,
    args: &EntrySearchArgs,
    markers: Option<(&str, &str)>,
) -> Result<String> {
    let raw_query = args.query.join(" ");
    let trimmed = raw_query.trim();
    if trimmed.is_empty() {
        bail!("search query cannot be empty");
    }

    let query = parse_query(trimmed);
    let use_regex = args.regex || ctx.config.search.regex_default;
    let pattern = if use_regex {
        regex_pattern_from_input(trimmed)
    } else {
        None
    };
    if !query.has_terms() && !query.has_filters() && pattern.is_none() {
        bail!("search query must contain terms or filters");
    }

    let repos = ctx.repositories()?;
    let books = repos.books.list()?;
    let mut matcher = EntryMatcher::new(query, &books);
    let mut highlighter = Highlighter::from_terms(&matcher.query().highlight_terms());
    if let Some(pattern) = pattern {
        let regex = build_regex(&pattern)?;
        highlighter = Highlighter::from_regex(regex.clone());
        matcher = matcher.with_regex(regex);
    }

    let limit = args.limit.unwrap_or(ctx.config.search.max_results);
    let results = matcher.filter(repos.entries.list()?, limit);
    let names = book_names(&books);

    let mut out = String::new();
    notice_line(&mut out, repos.entries.take_notice());
    if results.is_empty() {
        out.push_str("No matches found.\n");
        return Ok(out);
    }
    let marks = highlighter.as_ref().zip(markers);
    for entry in &results {
        out.push_str(&format_entry(
            entry,
            &names,
            ctx.config.display.preview_chars,
            marks,
        ));
    }
    Ok(out)
}

fn list_drafts(ctx: &CommandContext) -> Result<String> {
    let runtime = AutoSaveRuntime::new(ctx.paths.autosave_dir(), &ctx.config.auto_save)?;
    let drafts = runtime.list_recovery()?;
    if drafts.is_empty() {
        return Ok("No unsaved drafts.\n".to_string());
    }
    let mut out = String::new();
    for draft in drafts {
        let _ = writeln!(
            out,
            "{}  saved {}  {}",
            draft.entry_id,
            format_timestamp(draft.saved_at),
            content::preview(&draft.entry.content, ctx.config.display.preview_chars)
        );
    }
    out.push_str("Run `diary entry edit <id>` to restore a draft, or add `--discard-draft` to drop it.\n");
    Ok(out)
}

fn create_book(ctx: &CommandContext, args: BookCreateArgs) -> Result<String> {
    let color = args
        .color
        .as_deref()
        .map(BookColor::parse)
        .transpose()?;
    let repos = ctx.repositories()?;
    let book = repos.books.create(&args.name, color)?;
    Ok(format!(
        "Created book '{}' ({}, {})\n",
        book.name,
        book.id,
        book.color.map_or("no colour", BookColor::name)
    ))
}

fn list_books(ctx: &CommandContext) -> Result<String> {
    let repos = ctx.repositories()?;
    let books = repos.books.list()?;
    if books.is_empty() {
        return Ok("No books yet.\n".to_string());
    }
    let entries = repos.entries.list()?;
    let current = ctx.local_books().current_book()?.map(|book| book.id);

    let mut out = String::new();
    notice_line(&mut out, repos.entries.take_notice());
    for book in &books {
        let count = entries.iter().filter(|e| e.belongs_to(&book.id)).count();
        let marker = if current.as_deref() == Some(book.id.as_str()) {
            '*'
        } else {
            ' '
        };
        let _ = writeln!(
            out,
            "{marker} {}  {}  {} {}  {}",
            pad(&book.name, 24),
            book.id,
            pad(book.color.map_or("none", BookColor::name), 10),
            pad(book.color.map_or("", BookColor::hex), 7),
            plural(count, "entry", "entries")
        );
    }
    let unfiled = entries.iter().filter(|e| e.book_id.is_none()).count();
    let _ = writeln!(out, "  {}  {}", pad("(unfiled)", 24), plural(unfiled, "entry", "entries"));
    Ok(out)
}

fn delete_book(ctx: &CommandContext, key: &str) -> Result<String> {
    let repos = ctx.repositories()?;
    let book = resolve_book(repos.books.as_ref(), key)?;
    let outcome = repos
        .books
        .delete(&book.id, repos.entries.as_ref())?
        .with_context(|| format!("book '{key}' not found"))?;
    Ok(format!(
        "Deleted book '{}' ({} moved to unfiled)\n",
        outcome.book.name,
        plural(outcome.detached, "entry", "entries")
    ))
}

fn use_book(ctx: &CommandContext, key: &str) -> Result<String> {
    let books = ctx.local_books();
    if key.trim().eq_ignore_ascii_case("all") {
        books.set_current_book(None)?;
        return Ok("Showing entries from all books\n".to_string());
    }
    let book = resolve_book(&books, key)?;
    books.set_current_book(Some(&book.id))?;
    Ok(format!("Current book is now '{}'\n", book.name))
}

fn record_mood(ctx: &CommandContext, args: MoodRecordArgs) -> Result<String> {
    let repos = ctx.repositories()?;
    let sample = repos.moods.record(args.mood, args.note)?;
    Ok(format!(
        "Recorded {} at {}\n",
        mood_cell(Some(sample.mood)),
        format_timestamp(sample.date)
    ))
}

fn list_moods(ctx: &CommandContext, args: &MoodListArgs) -> Result<String> {
    let repos = ctx.repositories()?;
    let limit = args.limit.unwrap_or(ctx.config.display.list_limit);
    let samples = trends::recent(&repos.moods.list()?, limit);
    if samples.is_empty() {
        return Ok("No moods recorded yet.\n".to_string());
    }
    let mut out = String::new();
    for sample in samples {
        let _ = write!(
            out,
            "{}  {}",
            format_timestamp(sample.date),
            pad(&mood_cell(Some(sample.mood)), MOOD_COLUMN)
        );
        if let Some(note) = &sample.note {
            let _ = write!(out, "  {note}");
        }
        out.push('\n');
    }
    Ok(out)
}

fn mood_trend(ctx: &CommandContext, args: &MoodTrendArgs, now: OffsetDateTime) -> Result<String> {
    let repos = ctx.repositories()?;
    let samples = repos.moods.list()?;
    let entries = if args.no_entries {
        Vec::new()
    } else {
        repos.entries.list()?
    };
    let days = args.days.unwrap_or(ctx.config.display.trend_days);
    let merged = trends::merge_samples(samples, &entries);
    let window = trends::within_days(&merged, days, now);

    let mut out = String::new();
    notice_line(&mut out, repos.entries.take_notice());
    if window.is_empty() {
        let _ = writeln!(out, "No moods recorded in the last {days} days.");
        return Ok(out);
    }

    let daily = trends::daily_average(&window);
    let summary = trends::summary(&window);
    let _ = writeln!(
        out,
        "Mood over the last {days} days ({})",
        plural(summary.count, "check-in", "check-ins")
    );
    let _ = writeln!(
        out,
        "  {}",
        trends::render_sparkline(daily.iter().map(|day| day.average))
    );
    if let (Some(first), Some(last)) = (daily.first(), daily.last()) {
        let _ = writeln!(out, "  {} .. {}", first.day, last.day);
    }
    if let Some(mean) = summary.mean {
        let _ = writeln!(
            out,
            "  average   {mean:.2} ({})",
            trends::nearest_mood(mean).label()
        );
    }
    if let Some(mood) = summary.most_frequent {
        let _ = writeln!(out, "  most often {}", mood_cell(Some(mood)));
    }
    out.push('\n');
    for (mood, count) in trends::distribution(&window) {
        let _ = writeln!(
            out,
            "  {}  {:>3}  {}",
            pad(&mood_cell(Some(mood)), MOOD_COLUMN),
            count,
            "#".repeat(count)
        );
    }
    Ok(out)
}

fn mood_scale() -> String {
    let mut out = String::new();
    for style in MOOD_TABLE.iter() {
        let _ = writeln!(
            out,
            "{}  {}  {}  {}",
            style.mood.code(),
            pad(style.glyph, 4),
            pad(style.label, 8),
            style.color
        );
    }
    out
}

fn login(ctx: &CommandContext, args: CredentialArgs) -> Result<String> {
    let client = ctx.require_remote()?;
    let password = match args.password {
        Some(password) => password,
        None => prompt("Password")?,
    };
    let session = client
        .sign_in(args.email.trim(), &password)
        .context("signing in")?;
    ctx.sessions().save(&session)?;
    tracing::info!(user = ?session.user().map(|u| &u.id), "signed in");
    let mut out = format!("Signed in as {}\n", describe_user(&session));
    out.push_str(&first_login_sync(ctx, client, &session)?);
    Ok(out)
}

fn signup(ctx: &CommandContext, args: CredentialArgs) -> Result<String> {
    let client = ctx.require_remote()?;
    let password = match args.password {
        Some(password) => password,
        None => prompt("Password")?,
    };
    match client
        .sign_up(args.email.trim(), &password)
        .context("creating account")?
    {
        SignUpOutcome::SignedIn(session) => {
            ctx.sessions().save(&session)?;
            let mut out = format!("Account created, signed in as {}\n", describe_user(&session));
            out.push_str(&first_login_sync(ctx, client, &session)?);
            Ok(out)
        }
        SignUpOutcome::ConfirmationRequired { email } => Ok(format!(
            "Check {email} for a confirmation link, then run `diary auth login {email}`\n"
        )),
    }
}

fn first_login_sync(ctx: &CommandContext, client: RemoteClient, session: &Session) -> Result<String> {
    let client = client.with_session(Some(session));
    let outcome = sync::sync_after_login(&ctx.storage, Some(&client), Some(session))?;
    Ok(describe_sync(&outcome))
}

fn logout(ctx: &CommandContext) -> Result<String> {
    let store = ctx.sessions();
    let Some(session) = store.current()? else {
        store.clear()?;
        return Ok("Not signed in\n".to_string());
    };
    if let Some(client) = ctx.remote()? {
        if let Err(err) = client.sign_out(&session) {
            tracing::warn!(%err, "remote sign-out failed, clearing local session anyway");
        }
    }
    store.clear()?;
    Ok(format!("Signed out {}\n", describe_user(&session)))
}

fn auth_status(ctx: &CommandContext) -> Result<String> {
    let mut out = String::new();
    match ctx.sessions().current()? {
        Some(session) => {
            let _ = write!(out, "Signed in as {}", describe_user(&session));
            if let Some(at) = session
                .expires_at
                .and_then(|at| OffsetDateTime::from_unix_timestamp(at).ok())
            {
                let _ = write!(out, " until {}", format_timestamp(at));
            }
            out.push('\n');
        }
        None => out.push_str("Not signed in\n"),
    }
    if !ctx.config.remote.is_configured() {
        out.push_str("Cloud storage is not configured\n");
    }
    Ok(out)
}

fn run_sync(ctx: &CommandContext) -> Result<String> {
    let session = ctx.sessions().current()?;
    let client = ctx
        .remote()?
        .map(|client| client.with_session(session.as_ref()));
    let sink = client.as_ref().map(|client| client as &dyn sync::EntrySink);
    let outcome = sync::sync_local_to_cloud(&ctx.storage, sink, session.as_ref())?;
    Ok(describe_sync(&outcome))
}

fn status_report(ctx: &CommandContext) -> Result<String> {
    let repos = ctx.repositories()?;
    let session = ctx.sessions().current()?;
    let runtime = AutoSaveRuntime::new(ctx.paths.autosave_dir(), &ctx.config.auto_save)?;
    let drafts = runtime.list_recovery()?.len();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "storage    {} ({})",
        repos.entries.kind(),
        ctx.storage.database_path().display()
    );
    let _ = writeln!(
        out,
        "signed in  {}",
        session
            .as_ref()
            .map(describe_user)
            .unwrap_or_else(|| "no".to_string())
    );
    let synced = sync::sync_completed(&ctx.storage)?;
    let _ = writeln!(out, "cloud sync {}", if synced { "done" } else { "pending" });
    let _ = writeln!(
        out,
        "theme      {}",
        ctx.config.theme.display_name()
    );
    if ctx.config.auto_save.enabled {
        let _ = writeln!(
            out,
            "auto-save  after {} ms idle",
            ctx.config.auto_save.debounce_ms
        );
    } else {
        out.push_str("auto-save  off\n");
    }
    let _ = writeln!(out, "drafts     {drafts}");
    Ok(out)
}

fn list_backups(ctx: &CommandContext) -> Result<String> {
    let backups = ctx.storage.list_backups()?;
    if backups.is_empty() {
        return Ok("No backups yet.\n".to_string());
    }
    let mut out = String::new();
    for backup in backups {
        let when = OffsetDateTime::from_unix_timestamp(backup.created_at)
            .map(format_timestamp)
            .unwrap_or_else(|_| backup.created_at.to_string());
        let _ = writeln!(out, "{when}  {}", display_path(&backup.path));
    }
    Ok(out)
}

fn describe_sync(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::NotConfigured => {
            "Cloud storage is not configured; entries stay on this device.\n".to_string()
        }
        SyncOutcome::NoSession => "Sign in to sync entries to the cloud.\n".to_string(),
        SyncOutcome::AlreadySynced => "Entries were already synced.\n".to_string(),
        SyncOutcome::NothingToSync => "No local entries to sync.\n".to_string(),
        SyncOutcome::Pushed { count } => format!(
            "Synced {} to the cloud.\n",
            plural(*count, "entry", "entries")
        ),
        SyncOutcome::Failed { message } => {
            format!("Sync failed: {message}. Local entries were kept.\n")
        }
    }
}

fn describe_user(session: &Session) -> String {
    match session.user() {
        Some(user) => user.email.clone().unwrap_or_else(|| user.id.clone()),
        None => "anonymous".to_string(),
    }
}

fn resolve_book(books: &dyn BookRepository, key: &str) -> Result<Book> {
    books
        .find(key)?
        .with_context(|| format!("book '{}' not found", key.trim()))
}

fn book_names(books: &[Book]) -> HashMap<String, String> {
    books
        .iter()
        .map(|book| (book.id.clone(), book.name.clone()))
        .collect()
}

fn book_cell(entry: &DiaryEntry, names: &HashMap<String, String>) -> String {
    match &entry.book_id {
        Some(id) => names
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("{id} (missing)")),
        None => "(unfiled)".to_string(),
    }
}

fn mood_cell(mood: Option<Mood>) -> String {
    match mood {
        Some(mood) => format!("{} {}", mood.style().glyph, mood.label()),
        None => "-".to_string(),
    }
}

fn format_entry(
    entry: &DiaryEntry,
    names: &HashMap<String, String>,
    preview_chars: usize,
    highlight: Option<(&Highlighter, (&str, &str))>,
) -> String {
    let preview = content::preview(&entry.content, preview_chars);
    let preview = match highlight {
        Some((highlighter, (open, close))) => highlighter.render(&preview, open, close),
        None => preview,
    };
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}  {}  {}  {}",
        entry.id,
        pad(&long_date(entry.date), DATE_COLUMN),
        pad(&mood_cell(entry.mood), MOOD_COLUMN),
        book_cell(entry, names)
    );
    if !preview.is_empty() {
        let _ = writeln!(out, "    {preview}");
    }
    out
}

fn notice_line(out: &mut String, notice: Option<String>) {
    if let Some(notice) = notice {
        let _ = writeln!(out, "note: {notice}");
    }
}

fn pad(text: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(text);
    format!("{text}{}", " ".repeat(width.saturating_sub(used)))
}

fn plural(count: usize, one: &str, many: &str) -> String {
    format!("{count} {}", if count == 1 { one } else { many })
}

fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

fn format_time(at: OffsetDateTime) -> String {
    at.format(format_description!("[hour]:[minute]"))
        .unwrap_or_default()
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MoodSample;
    use crate::repository::{EntryRepository, LocalEntryRepository};
    use crate::storage::{self, keys};
    use tempfile::TempDir;
    use time::Duration;

    type TestResult<T = ()> = Result<T>;

    fn setup() -> TestResult<(TempDir, CommandContext)> {
        let temp = TempDir::new().context("creating temp dir")?;
        let paths = ConfigPaths::under(temp.path());
        paths.ensure_directories()?;
        let mut config = AppConfig::default();
        config.storage = storage::tests::storage_options(&paths);
        let handle = storage::init(&config.storage)?;
        Ok((temp, CommandContext::new(Arc::new(config), paths, handle)))
    }

    fn new_args(content: &str, mood: Option<Mood>, book: Option<&str>) -> EntryNewArgs {
        EntryNewArgs {
            content: Some(content.into()),
            mood,
            book: book.map(str::to_string),
        }
    }

    fn edit_args(id: &str) -> EntryEditArgs {
        EntryEditArgs {
            id: id.into(),
            content: None,
            mood: None,
            clear_mood: false,
            book: None,
            unfile: false,
            discard_draft: false,
        }
    }

    fn only_entry(ctx: &CommandContext) -> TestResult<DiaryEntry> {
        let mut entries = LocalEntryRepository::new(ctx.storage.clone()).list()?;
        assert_eq!(entries.len(), 1);
        Ok(entries.remove(0))
    }

    #[test]
    fn cli_new_entry_goes_into_current_book() -> TestResult {
        let (_temp, ctx) = setup()?;
        create_book(
            &ctx,
            BookCreateArgs {
                name: "Travel".into(),
                color: Some("teal".into()),
            },
        )?;
        let output = use_book(&ctx, "travel")?;
        assert_eq!(output, "Current book is now 'Travel'\n");

        let output = new_entry(&ctx, new_args("<p>Arrived in Lisbon</p>", Some(Mood::Excited), None))?;
        assert!(output.contains("(local) in Travel"));

        let entry = only_entry(&ctx)?;
        let travel = ctx.local_books().find("Travel")?.expect("book exists");
        assert_eq!(entry.book_id, Some(travel.id));
        assert_eq!(entry.mood, Some(Mood::Excited));
        Ok(())
    }

    #[test]
    fn cli_list_filters_by_book_and_unfiled() -> TestResult {
        let (_temp, ctx) = setup()?;
        create_book(
            &ctx,
            BookCreateArgs {
                name: "Work".into(),
                color: None,
            },
        )?;
        new_entry(&ctx, new_args("standup notes", None, Some("work")))?;
        new_entry(&ctx, new_args("lazy sunday", Some(Mood::Happy), None))?;

        let work = list_entries(
            &ctx,
            &EntryListArgs {
                book: Some("Work".into()),
                ..EntryListArgs::default()
            },
        )?;
        assert!(work.contains("standup notes"));
        assert!(!work.contains("lazy sunday"));

        let unfiled = list_entries(
            &ctx,
            &EntryListArgs {
                unfiled: true,
                ..EntryListArgs::default()
            },
        )?;
        assert!(unfiled.contains("lazy sunday"));
        assert!(unfiled.contains(":) Happy"));
        assert!(!unfiled.contains("standup notes"));

        let all = list_entries(&ctx, &EntryListArgs::default())?;
        assert!(all.contains("standup notes") && all.contains("lazy sunday"));
        Ok(())
    }

    #[test]
    fn cli_edit_saves_once_through_autosave() -> TestResult {
        let (_temp, ctx) = setup()?;
        new_entry(&ctx, new_args("first draft", None, None))?;
        let before = only_entry(&ctx)?;

        let mut args = edit_args(&before.id);
        args.content = Some("second draft".into());
        args.mood = Some(Mood::Sad);
        let output = edit_entry(&ctx, args)?;
        assert_eq!(output, format!("Saved entry {} (local)\n", before.id));

        let after = only_entry(&ctx)?;
        assert_eq!(after.content, "second draft");
        assert_eq!(after.mood, Some(Mood::Sad));
        assert_eq!(after.created_at, before.created_at);

        let output = edit_entry(&ctx, edit_args(&before.id))?;
        assert_eq!(output, format!("No changes to entry {}\n", before.id));
        assert_eq!(list_drafts(&ctx)?, "No unsaved drafts.\n");
        Ok(())
    }

    #[test]
    fn cli_edit_unknown_entry_fails() -> TestResult {
        let (_temp, ctx) = setup()?;
        let err = edit_entry(&ctx, edit_args("404")).expect_err("missing entry");
        assert!(err.to_string().contains("entry 404 not found"));
        Ok(())
    }

    #[test]
    fn cli_show_and_delete_entry() -> TestResult {
        let (_temp, ctx) = setup()?;
        new_entry(&ctx, new_args("<p>Tea &amp; cake</p>", Some(Mood::Neutral), None))?;
        let entry = only_entry(&ctx)?;

        let shown = show_entry(&ctx, &entry.id)?;
        assert!(shown.contains("Tea & cake"));
        assert!(shown.contains("mood   :| Neutral"));
        assert!(shown.contains("book   (unfiled)"));
        assert!(shown.contains("chars  10"));

        assert_eq!(delete_entry(&ctx, &entry.id)?, format!("Deleted entry {}\n", entry.id));
        assert!(delete_entry(&ctx, &entry.id).is_err());
        Ok(())
    }

    #[test]
    fn cli_search_filters_and_supports_regex() -> TestResult {
        let (_temp, ctx) = setup()?;
        new_entry(&ctx, new_args("Rainy walk by the river", Some(Mood::Sad), None))?;
        new_entry(&ctx, new_args("Sunny walk in the park", Some(Mood::Happy), None))?;

        let args = EntrySearchArgs {
            query: vec!["walk".into(), "mood:happy".into()],
            regex: false,
            limit: None,
        };
        let output = run_search(&ctx, &args, Some(("[", "]")))?;
        assert!(output.contains("Sunny [walk] in the park"));
        assert!(!output.contains("Rainy"));

        let args = EntrySearchArgs {
            query: vec!["r(iver|ain)".into()],
            regex: true,
            limit: None,
        };
        let output = run_search(&ctx, &args, None)?;
        assert!(output.contains("Rainy walk by the river"));
        assert!(!output.contains("Sunny"));

        let args = EntrySearchArgs {
            query: vec!["dancing".into()],
            regex: false,
            limit: None,
        };
        assert_eq!(run_search(&ctx, &args, None)?, "No matches found.\n");
        Ok(())
    }

    #[test]
    fn cli_book_delete_moves_entries_to_unfiled() -> TestResult {
        let (_temp, ctx) = setup()?;
        create_book(
            &ctx,
            BookCreateArgs {
                name: "Dreams".into(),
                color: Some("#7C3AED".into()),
            },
        )?;
        new_entry(&ctx, new_args("flying again", None, Some("Dreams")))?;
        new_entry(&ctx, new_args("falling", None, Some("dreams")))?;

        let listing = list_books(&ctx)?;
        assert!(listing.contains("Dreams"));
        assert!(listing.contains("2 entries"));

        let output = delete_book(&ctx, "Dreams")?;
        assert_eq!(output, "Deleted book 'Dreams' (2 entries moved to unfiled)\n");
        assert_eq!(list_books(&ctx)?, "No books yet.\n");

        let entries = LocalEntryRepository::new(ctx.storage.clone()).list()?;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.book_id.is_none()));
        Ok(())
    }

    #[test]
    fn cli_book_create_rejects_unknown_colour() -> TestResult {
        let (_temp, ctx) = setup()?;
        let result = create_book(
            &ctx,
            BookCreateArgs {
                name: "Odd".into(),
                color: Some("plaid".into()),
            },
        );
        assert!(result.is_err());
        assert_eq!(list_books(&ctx)?, "No books yet.\n");
        Ok(())
    }

    #[test]
    fn cli_mood_trend_merges_entry_moods() -> TestResult {
        let (_temp, ctx) = setup()?;
        let now = OffsetDateTime::now_utc();
        let mut old = MoodSample::new(Mood::Angry, None);
        old.date = now - Duration::days(90);
        ctx.storage.write_json(keys::MOODS, &[old])?;

        record_mood(
            &ctx,
            MoodRecordArgs {
                mood: Mood::Happy,
                note: Some("sunny".into()),
            },
        )?;
        new_entry(&ctx, new_args("good day", Some(Mood::Happy), None))?;
        new_entry(&ctx, new_args("meh", Some(Mood::Neutral), None))?;

        let output = mood_trend(&ctx, &MoodTrendArgs::default(), now + Duration::minutes(1))?;
        assert!(output.contains("(3 check-ins)"), "{output}");
        assert!(output.contains("most often :) Happy"));
        assert!(output.contains("  2  ##"));

        let only_samples = mood_trend(
            &ctx,
            &MoodTrendArgs {
                days: Some(365),
                no_entries: true,
            },
            now + Duration::minutes(1),
        )?;
        assert!(only_samples.contains("(2 check-ins)"), "{only_samples}");

        let listed = list_moods(&ctx, &MoodListArgs::default())?;
        assert!(listed.contains("sunny"));
        Ok(())
    }

    #[test]
    fn cli_mood_scale_lists_every_mood() {
        let scale = mood_scale();
        assert_eq!(scale.lines().count(), 5);
        for mood in Mood::ALL {
            assert!(scale.contains(mood.label()));
            assert!(scale.contains(mood.color()));
        }
        assert!(scale.starts_with("1  :)    Happy     #eab308\n"));
    }

    #[test]
    fn cli_cloud_commands_without_configuration() -> TestResult {
        let (_temp, ctx) = setup()?;
        new_entry(&ctx, new_args("stays here", None, None))?;

        let err = login(
            &ctx,
            CredentialArgs {
                email: "me@example.com".into(),
                password: Some("secret".into()),
            },
        )
        .expect_err("no backend configured");
        assert!(err.to_string().contains(ENV_REMOTE_URL));
        assert!(matches!(
            err.downcast_ref::<RemoteError>(),
            Some(RemoteError::NotConfigured)
        ));

        assert_eq!(
            run_sync(&ctx)?,
            "Cloud storage is not configured; entries stay on this device.\n"
        );
        assert_eq!(
            auth_status(&ctx)?,
            "Not signed in\nCloud storage is not configured\n"
        );
        assert_eq!(logout(&ctx)?, "Not signed in\n");
        assert_eq!(only_entry(&ctx)?.content, "stays here");
        Ok(())
    }

    #[test]
    fn cli_status_and_backups() -> TestResult {
        let (_temp, ctx) = setup()?;
        let status = status_report(&ctx)?;
        assert!(status.starts_with("storage    local ("));
        assert!(status.contains("signed in  no"));
        assert!(status.contains("cloud sync pending"));
        assert!(status.contains("theme      Warm Sunset"));
        assert!(status.contains("auto-save  after 3000 ms idle"));

        assert_eq!(list_backups(&ctx)?, "No backups yet.\n");
        let record = ctx.storage.backup_to(&ctx.config.storage.backup_dir)?;
        assert!(record.path.exists());
        assert!(list_backups(&ctx)?.contains(&display_path(&record.path)));
        Ok(())
    }

    #[test]
    fn cli_book_without_colour() -> TestResult {
        let (_temp, ctx) = setup()?;
        let output = create_book(
            &ctx,
            BookCreateArgs {
                name: "Scratch".into(),
                color: None,
            },
        )?;
        let book = ctx.local_books().find("Scratch")?.expect("book exists");
        assert_eq!(book.color, None);
        assert_eq!(output, format!("Created book 'Scratch' ({}, no colour)\n", book.id));

        new_entry(&ctx, new_args("loose thought", None, Some("Scratch")))?;
        let listing = list_books(&ctx)?;
        let line = listing
            .lines()
            .find(|line| line.contains("Scratch"))
            .expect("book listed");
        assert!(line.contains(&format!("{}  none ", book.id)), "{line}");
        assert!(line.ends_with("  1 entry"), "{line}");
        assert!(!line.contains('#'));
        Ok(())
    }

    #[test]
    fn cli_mood_trend_with_huge_window_shows_everything() -> TestResult {
        let (_temp, ctx) = setup()?;
        record_mood(
            &ctx,
            MoodRecordArgs {
                mood: Mood::Sad,
                note: None,
            },
        )?;
        let output = mood_trend(
            &ctx,
            &MoodTrendArgs {
                days: Some(5_000_000),
                no_entries: false,
            },
            OffsetDateTime::now_utc() + Duration::minutes(1),
        )?;
        assert!(
            output.starts_with("Mood over the last 5000000 days (1 check-in)\n"),
            "{output}"
        );
        Ok(())
    }

    #[test]
    fn cli_edit_restores_or_discards_leftover_draft() -> TestResult {
        let (_temp, ctx) = setup()?;
        new_entry(&ctx, new_args("kept text", None, None))?;
        let entry = only_entry(&ctx)?;
        let id = entry.id.clone();
        let leave_draft = |text: &str| -> TestResult {
            let mut runtime =
                AutoSaveRuntime::new(ctx.paths.autosave_dir(), &ctx.config.auto_save)?;
            runtime.start_session(entry.clone())?;
            runtime.update_buffer(&id, text)?;
            Ok(())
        };

        leave_draft("abandoned text")?;
        assert!(list_drafts(&ctx)?.contains("abandoned text"));
        let mut args = edit_args(&id);
        args.discard_draft = true;
        assert_eq!(
            edit_entry(&ctx, args)?,
            format!("Discarded unsaved changes to entry {id}\nNo changes to entry {id}\n")
        );
        assert_eq!(only_entry(&ctx)?.content, "kept text");
        assert_eq!(list_drafts(&ctx)?, "No unsaved drafts.\n");

        leave_draft("recovered text")?;
        let output = edit_entry(&ctx, edit_args(&id))?;
        assert!(output.starts_with("Recovered unsaved changes from "), "{output}");
        assert!(output.ends_with(&format!("Saved entry {id} (local)\n")));
        assert_eq!(only_entry(&ctx)?.content, "recovered text");
        assert_eq!(list_drafts(&ctx)?, "No unsaved drafts.\n");
        Ok(())
    }
}
