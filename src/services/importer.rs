//! Batch importer.
//!
//! Reconciles an on-disk archive laid out as `{root}/{user}/{board}/{file}`
//! into the board index through a cancellable pipeline:
//!
//! ```text
//! list users ──▶ [users] ──▶ N × list boards ──▶ [boards] ──▶ N × list files ──▶ [files] ──▶ N × persist
//! ```
//!
//! Every stage's channel is closed once the last of its producers has
//! exited, which happens when their sender clones are dropped. The first
//! failing worker cancels the whole run and its error is the one returned.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::broker::BoardIndex;
use crate::error::{AppError, Result};
use crate::models::User;
use crate::utils::{board_key, namespaced};

/// Suffix of downloads that are still in progress.
const PART_SUFFIX: &str = ".part";

type SharedReceiver = Arc<Mutex<mpsc::Receiver<User>>>;

/// Totals of a finished import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub users: usize,
    pub boards: usize,
    pub files: usize,
}

#[derive(Debug, Default)]
struct Counters {
    users: AtomicUsize,
    boards: AtomicUsize,
    files: AtomicUsize,
}

impl Counters {
    fn summary(&self) -> ImportSummary {
        ImportSummary {
            users: self.users.load(Ordering::Relaxed),
            boards: self.boards.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
        }
    }
}

/// Imports a download directory into the board index.
pub struct Importer {
    root: PathBuf,
    workers: usize,
    index: Arc<dyn BoardIndex>,
    namespace: String,
}

impl Importer {
    /// `workers` is the number of workers per stage (at least one).
    pub fn new(root: impl Into<PathBuf>, workers: usize, index: Arc<dyn BoardIndex>) -> Self {
        Self {
            root: root.into(),
            workers: workers.max(1),
            index,
            namespace: String::new(),
        }
    }

    /// Prefix every index key with `namespace`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Run the import to completion.
    ///
    /// Cancelling `cancel` stops every stage at its next handoff and the run
    /// returns `AppError::Cancelled`. Index writes made before a failure are
    /// kept.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ImportSummary> {
        log::info!("Importing {} with {} workers per stage", self.root.display(), self.workers);

        let cancel = cancel.child_token();
        let counters = Arc::new(Counters::default());
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        let (users_tx, users_rx) = mpsc::channel::<User>(1);
        let (boards_tx, boards_rx) = mpsc::channel::<User>(1);
        let (files_tx, files_rx) = mpsc::channel::<User>(1);

        tasks.spawn(produce_users(self.root.clone(), users_tx, cancel.clone()));

        let users_rx: SharedReceiver = Arc::new(Mutex::new(users_rx));
        for _ in 0..self.workers {
            let root = self.root.clone();
            tasks.spawn(forward(
                users_rx.clone(),
                boards_tx.clone(),
                cancel.clone(),
                move |user| list_boards(root.clone(), user),
            ));
        }
        drop(boards_tx);

        let boards_rx: SharedReceiver = Arc::new(Mutex::new(boards_rx));
        for _ in 0..self.workers {
            let root = self.root.clone();
            tasks.spawn(forward(
                boards_rx.clone(),
                files_tx.clone(),
                cancel.clone(),
                move |user| list_files(root.clone(), user),
            ));
        }
        drop(files_tx);

        let files_rx: SharedReceiver = Arc::new(Mutex::new(files_rx));
        for _ in 0..self.workers {
            tasks.spawn(persist(
                files_rx.clone(),
                self.index.clone(),
                self.namespace.clone(),
                counters.clone(),
                cancel.clone(),
            ));
        }

        let mut first_error: Option<AppError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .unwrap_or_else(|e| Err(AppError::import(format!("import worker failed: {e}"))));
            if let Err(e) = result {
                cancel.cancel();
                // Workers that merely observed the cancellation report
                // `Cancelled`; keep the error that caused it.
                let replace = match &first_error {
                    None => true,
                    Some(AppError::Cancelled) => !matches!(e, AppError::Cancelled),
                    Some(_) => false,
                };
                if replace {
                    first_error = Some(e);
                }
            }
        }

        if let Some(e) = first_error {
            log::error!("Import of {} aborted: {}", self.root.display(), e);
            return Err(e);
        }

        let summary = counters.summary();
        log::info!(
            "Imported {} users, {} boards, {} files",
            summary.users,
            summary.boards,
            summary.files
        );
        Ok(summary)
    }
}

/// Stage 1: one `User` per directory below the root.
async fn produce_users(
    root: PathBuf,
    output: mpsc::Sender<User>,
    cancel: CancellationToken,
) -> Result<()> {
    for name in list_dir(&root, EntryKind::Directories).await? {
        send(&output, User::new(name), &cancel).await?;
    }
    Ok(())
}

/// Stages 2 and 3: enrich each user and hand it to the next stage.
async fn forward<F, Fut>(
    input: SharedReceiver,
    output: mpsc::Sender<User>,
    cancel: CancellationToken,
    step: F,
) -> Result<()>
where
    F: Fn(User) -> Fut,
    Fut: Future<Output = Result<User>>,
{
    while let Some(user) = receive(&input, &cancel).await? {
        let user = step(user).await?;
        send(&output, user, &cancel).await?;
    }
    Ok(())
}

/// Stage 4: record every file of every board in the index.
async fn persist(
    input: SharedReceiver,
    index: Arc<dyn BoardIndex>,
    namespace: String,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) -> Result<()> {
    while let Some(user) = receive(&input, &cancel).await? {
        for (board, files) in &user.boards {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let key = namespaced(&namespace, board_key(&user.username, board));
            log::info!("Importing: {}", key);
            for file in files {
                index.add_member(&key, file).await?;
            }
            counters.boards.fetch_add(1, Ordering::Relaxed);
        }
        counters.files.fetch_add(user.file_count(), Ordering::Relaxed);
        counters.users.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

async fn receive(input: &Mutex<mpsc::Receiver<User>>, cancel: &CancellationToken) -> Result<Option<User>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        user = async { input.lock().await.recv().await } => Ok(user),
    }
}

async fn send(output: &mpsc::Sender<User>, user: User, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        sent = output.send(user) => sent.map_err(|_| AppError::Cancelled),
    }
}

async fn list_boards(root: PathBuf, mut user: User) -> Result<User> {
    let dir = root.join(&user.username);
    for board in list_dir(&dir, EntryKind::Directories).await? {
        user.boards.insert(board, Vec::new());
    }
    log::debug!("{}: {} boards", user.username, user.boards.len());
    Ok(user)
}

async fn list_files(root: PathBuf, mut user: User) -> Result<User> {
    let user_dir = root.join(&user.username);
    for (board, files) in user.boards.iter_mut() {
        *files = list_dir(&user_dir.join(board), EntryKind::Files).await?;
    }
    Ok(user)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Directories,
    Files,
}

/// Sorted names of the entries of `dir` of the given kind.
///
/// Unfinished downloads (`*.part`) and names that are not valid UTF-8 are
/// skipped.
async fn list_dir(dir: &Path, kind: EntryKind) -> Result<Vec<String>> {
    let io_error = |e: std::io::Error| AppError::import(format!("reading {}: {e}", dir.display()));

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let is_dir = entry.file_type().await.map_err(io_error)?.is_dir();
        if is_dir != (kind == EntryKind::Directories) {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            log::warn!("Skipping non UTF-8 entry in {}", dir.display());
            continue;
        };
        if kind == EntryKind::Files && name.ends_with(PART_SUFFIX) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}
