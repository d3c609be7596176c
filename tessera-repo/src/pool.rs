//! Shard pool - N single-threaded shards, each owning its cache.
//!
//! Every shard runs on its own OS thread with a current-thread runtime and a
//! `LocalSet`, so shard state never needs a lock. Work reaches a shard only
//! as a job message; snapshot delivery runs as a task on each shard.
//!
//! ```text
//!                 ┌─► shard-0 thread: [delivery task] [jobs] [lifecycle tasks]
//! ShardPool ──────┼─► shard-1 thread: ...
//!   │             └─► shard-n thread: ...
//!   └─ caller runtime: TopologyWatcher, directory Coordinator
//! ```

use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::JoinHandle;

use futures::future::LocalBoxFuture;
use tessera_core::{ShardId, TableId};
use tessera_routing::{Router, SnapshotCell, SnapshotFeed, Topology, TopologyWatcher};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinSet, LocalSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::cache::ShardCache;
use crate::config::RepoConfig;
use crate::directory::{Coordinator, DirectoryHandle, DirectoryState};
use crate::error::{PoolError, RepoResult};
use crate::handle::AccessHandle;
use crate::interface::InterfaceConstructor;

type Job<C> = Box<dyn FnOnce(ShardContext<C>) -> LocalBoxFuture<'static, ()> + Send>;

enum ShardCommand<C: InterfaceConstructor> {
    Run(Job<C>),
    Shutdown { reply: oneshot::Sender<()> },
}

/// What a job sees while running on a shard.
pub struct ShardContext<C: InterfaceConstructor> {
    shard: ShardId,
    cache: Rc<ShardCache<C>>,
    router: Router,
    cancel: CancellationToken,
}

impl<C: InterfaceConstructor> ShardContext<C> {
    /// Returns the shard the job runs on.
    #[must_use]
    pub const fn shard(&self) -> ShardId {
        self.shard
    }

    /// Returns the shard's cache.
    #[must_use]
    pub const fn cache(&self) -> &Rc<ShardCache<C>> {
        &self.cache
    }

    /// Returns a router over the shard's current snapshot.
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Returns the token that fires when the shard stops accepting work.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Gets the interface for `table_id`, cancelled when the shard stops.
    ///
    /// # Errors
    ///
    /// Returns a cancellation error if the shard stops first.
    pub async fn get_interface(&self, table_id: TableId) -> RepoResult<AccessHandle<C::Interface>> {
        self.cache.get_interface(table_id, &self.cancel).await
    }
}

impl<C: InterfaceConstructor> Clone for ShardContext<C> {
    fn clone(&self) -> Self {
        Self {
            shard: self.shard,
            cache: Rc::clone(&self.cache),
            router: self.router.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

struct ShardHandle<C: InterfaceConstructor> {
    shard: ShardId,
    commands: mpsc::UnboundedSender<ShardCommand<C>>,
    routing: Arc<SnapshotCell>,
    thread: Option<JoinHandle<()>>,
}

impl<C: InterfaceConstructor> ShardHandle<C> {
    fn spawn(
        shard: ShardId,
        config: &RepoConfig,
        constructor: Arc<C>,
        directory: DirectoryHandle,
        feed: SnapshotFeed,
    ) -> Result<Self, PoolError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| PoolError::Spawn { shard, source })?;

        let (commands, rx) = mpsc::unbounded_channel();
        let routing = Arc::new(SnapshotCell::new());
        let shard_routing = Arc::clone(&routing);
        let config = config.clone();

        let thread = std::thread::Builder::new()
            .name(format!("tessera-shard-{}", shard.get()))
            .spawn(move || {
                let local = LocalSet::new();
                local.block_on(
                    &runtime,
                    serve_shard(shard, config, constructor, shard_routing, directory, feed, rx),
                );
            })
            .map_err(|source| PoolError::Spawn { shard, source })?;

        Ok(Self {
            shard,
            commands,
            routing,
            thread: Some(thread),
        })
    }
}

async fn serve_shard<C: InterfaceConstructor>(
    shard: ShardId,
    config: RepoConfig,
    constructor: Arc<C>,
    routing: Arc<SnapshotCell>,
    directory: DirectoryHandle,
    feed: SnapshotFeed,
    mut commands: mpsc::UnboundedReceiver<ShardCommand<C>>,
) {
    let delivery = tokio::task::spawn_local(feed.apply_to(Arc::clone(&routing)));
    let cache = Rc::new(ShardCache::new(
        shard,
        &config,
        constructor,
        Arc::clone(&routing),
        directory,
    ));
    let context = ShardContext {
        shard,
        cache: Rc::clone(&cache),
        router: Router::new(routing),
        cancel: CancellationToken::new(),
    };
    let mut jobs = JoinSet::new();
    info!(shard = %shard, "Shard started");

    let reply = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ShardCommand::Run(job)) => {
                    jobs.spawn_local(job(context.clone()));
                }
                Some(ShardCommand::Shutdown { reply }) => break Some(reply),
                None => break None,
            },
            // The drain below raises the panic again on this thread.
            () = cache.failed() => break None,
            Some(finished) = jobs.join_next(), if !jobs.is_empty() => {
                if let Err(err) = finished {
                    if err.is_panic() {
                        warn!(shard = %shard, "Job panicked");
                    }
                }
            }
        }
    };

    // Jobs go first so their access handles are gone before the drain.
    context.cancel.cancel();
    jobs.shutdown().await;
    drop(context);
    cache.shutdown().await;
    delivery.abort();
    info!(shard = %shard, "Shard stopped");

    if let Some(reply) = reply {
        let _ = reply.send(());
    }
}

/// A set of shards sharing one constructor, topology and directory.
pub struct ShardPool<C: InterfaceConstructor> {
    shards: Vec<ShardHandle<C>>,
    background: CancellationToken,
    tasks: TaskTracker,
}

impl<C: InterfaceConstructor> ShardPool<C> {
    /// Starts `config.shard_count` shards.
    ///
    /// Must be called from within a Tokio runtime; the topology watcher and
    /// directory coordinator are spawned onto it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, there is no current
    /// runtime, or a shard thread cannot be started.
    pub fn start(
        config: RepoConfig,
        constructor: C,
        topology: watch::Receiver<Arc<Topology>>,
        directory: watch::Receiver<Arc<DirectoryState>>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let constructor = Arc::new(constructor);
        let (coordinator, directory_handle) = Coordinator::new(directory);
        let mut watcher = TopologyWatcher::new(topology);

        let mut shards = Vec::with_capacity(config.shard_count as usize);
        for index in 0..config.shard_count {
            let shard = ShardId::new(index);
            shards.push(ShardHandle::spawn(
                shard,
                &config,
                Arc::clone(&constructor),
                directory_handle.clone(),
                watcher.subscribe(),
            )?);
        }

        let background = CancellationToken::new();
        let tasks = TaskTracker::new();
        tasks.spawn_on(coordinator.run(background.clone()), &runtime);
        tasks.spawn_on(watcher.run(background.clone()), &runtime);
        tasks.close();

        info!(
            shards = config.shard_count,
            idle_timeout = ?config.idle_timeout,
            "Shard pool started"
        );
        Ok(Self {
            shards,
            background,
            tasks,
        })
    }

    /// Returns the number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns the routing snapshot source of `shard`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::UnknownShard` if the shard does not exist.
    pub fn routing(&self, shard: ShardId) -> Result<Arc<SnapshotCell>, PoolError> {
        self.shard(shard).map(|handle| Arc::clone(&handle.routing))
    }

    /// Runs `f` on `shard` and returns its output.
    ///
    /// Jobs are cancelled (dropped) when the pool shuts down; the context's
    /// cancel token fires first.
    ///
    /// # Errors
    ///
    /// Returns an error if the shard does not exist, has stopped, or dropped
    /// the job before it completed.
    pub async fn run_on<F, Fut, T>(&self, shard: ShardId, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(ShardContext<C>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let handle = self.shard(shard)?;
        let (reply, rx) = oneshot::channel();
        let job: Job<C> = Box::new(move |ctx| {
            Box::pin(async move {
                // The caller may have stopped waiting.
                let _ = reply.send(f(ctx).await);
            })
        });

        handle
            .commands
            .send(ShardCommand::Run(job))
            .map_err(|_| PoolError::ShardStopped { shard })?;
        rx.await.map_err(|_| PoolError::JobDropped { shard })
    }

    fn shard(&self, shard: ShardId) -> Result<&ShardHandle<C>, PoolError> {
        self.shards
            .get(shard.index())
            .ok_or(PoolError::UnknownShard { shard })
    }

    /// Drains every shard, then stops the watcher and coordinator.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShardPanicked` if a shard thread panicked, which
    /// includes a broken cache invariant on that shard. Every other shard is
    /// still stopped.
    pub async fn shutdown(mut self) -> Result<(), PoolError> {
        let mut acks = Vec::with_capacity(self.shards.len());
        for handle in &self.shards {
            let (reply, rx) = oneshot::channel();
            if handle.commands.send(ShardCommand::Shutdown { reply }).is_err() {
                debug!(shard = %handle.shard, "Shard already stopped");
            }
            acks.push(rx);
        }

        let mut result = Ok(());
        for (handle, ack) in self.shards.iter_mut().zip(acks) {
            let _ = ack.await;
            let Some(thread) = handle.thread.take() else {
                continue;
            };
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!(shard = %handle.shard, "Shard thread panicked");
                if result.is_ok() {
                    result = Err(PoolError::ShardPanicked {
                        shard: handle.shard,
                    });
                }
            }
        }

        self.background.cancel();
        self.tasks.wait().await;
        info!("Shard pool stopped");
        result
    }
}

impl<C: InterfaceConstructor> Drop for ShardPool<C> {
    fn drop(&mut self) {
        // Shard threads stop on their own once their command senders drop.
        self.background.cancel();
    }
}

impl<C: InterfaceConstructor> std::fmt::Debug for ShardPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardPool")
            .field("shards", &self.shards.len())
            .finish_non_exhaustive()
    }
}
