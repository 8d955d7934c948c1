//! Storage Node Orchestrator
//!
//! Binds the subsystems together: the reactor loop owns the filesystem
//! registry and the coordinator map, the connection pool carries every
//! outbound event, and each wire event kind has one handler. Long block
//! scans run on worker tasks that answer through the originating
//! connection's sink, so the loop never stalls on disk.

pub mod admin;
pub mod status;


use crate::error::{NodeError, Result};
use crate::filesystem::store::scan_blocks;
use crate::filesystem::types::{FeatureDef, FilesystemConfig};
use crate::filesystem::FilesystemRegistry;
use crate::model::{Block, Coordinates, Metadata, Predicate, SpatialProperties};
use crate::net::pool::ConnectionPool;
use crate::net::protocol::{
    Event, FilesystemAction, MetadataKind, QueryAggregate, QueryPayload, SpoolInfo,
};
use crate::net::reactor::{event_queue, spawn_listener, EventQueue, EventSource, NodeEvent};
use crate::partition::Partitioner;
use crate::query::time::parse_time_window;
use crate::query::RequestCoordinator;
use crate::topology::{NetworkInfo, NodeInfo};
use self::status::{PidFile, StatusLine};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Everything the orchestrator needs from the outside world, passed in
/// explicitly so tests can run whole clusters out of temp directories.
#[derive(Debug, Clone)]
pub struct NodeEnvironment {
    pub hostname: String,
    pub canonical_hostname: String,
    pub port: u16,
    pub root_dir: PathBuf,
    pub topology_dir: PathBuf,
    pub query_timeout: Duration,
    pub allow_time_wildcards: bool,
    pub pid_file: Option<PathBuf>,
    pub admin_port: Option<u16>,
}

pub struct StorageNode {
    env: NodeEnvironment,
    me: NodeInfo,
    network: Arc<NetworkInfo>,
    registry: FilesystemRegistry,
    pool: Arc<ConnectionPool>,
    queue: EventQueue,
    coordinators: HashMap<String, RequestCoordinator>,
    request_counter: u64,
    session: i64,
    results_dir: PathBuf,
    status: StatusLine,
    published: Arc<RwLock<Vec<FilesystemConfig>>>,
    _pid: Option<PidFile>,
}

/// Handle to a node started with [`launch`].
pub struct RunningNode {
    pub node: NodeInfo,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl RunningNode {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

/// Bootstrap a node and drive it on a background task.
pub async fn launch(env: NodeEnvironment) -> Result<RunningNode> {
    let admin_port = env.admin_port;
    let (node, events, listener) = StorageNode::bootstrap(env).await?;
    let me = node.me.clone();
    if let Some(port) = admin_port {
        let state = admin::AdminState {
            node: me.clone(),
            network: node.network.clone(),
            filesystems: node.published.clone(),
        };
        tokio::spawn(admin::serve(port, state));
    }
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(node.run(events, listener, rx));
    Ok(RunningNode {
        node: me,
        shutdown: tx,
        handle,
    })
}

impl StorageNode {
    /// Fail-fast startup: bind the port, load and validate the topology,
    /// restore the registry. Each failure leaves a one-line explanation in
    /// the status file and aborts.
    pub async fn bootstrap(
        env: NodeEnvironment,
    ) -> Result<(StorageNode, mpsc::UnboundedReceiver<NodeEvent>, TcpListener)> {
        fs::create_dir_all(&env.root_dir)?;
        let status = StatusLine::new(env.root_dir.join("status.txt"));
        status.set("Starting");

        status.set("Binding");
        let listener = match TcpListener::bind(("0.0.0.0", env.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                status.set(&format!("Could not bind to port {}", env.port));
                return Err(e.into());
            }
        };

        status.set("LoadingTopology");
        let network = match NetworkInfo::load(&env.topology_dir) {
            Ok(network) => Arc::new(network),
            Err(e) => {
                status.set(&format!("Could not read topology: {}", e));
                return Err(e);
            }
        };
        let me = network
            .find_node(&env.hostname, env.port)
            .or_else(|| network.find_node(&env.canonical_hostname, env.port));
        let me = match me {
            Some(me) => me,
            None => {
                let msg = format!(
                    "host {} is not part of the topology; check `hostname` against the topology files",
                    env.hostname
                );
                status.set(&msg);
                return Err(NodeError::Partition(msg));
            }
        };

        status.set("RestoringFilesystems");
        let results_dir = env.root_dir.join(".results");
        fs::create_dir_all(&results_dir)?;
        let registry = match FilesystemRegistry::restore(&env.root_dir) {
            Ok(registry) => registry,
            Err(e) => {
                status.set(&format!("Could not restore filesystems: {}", e));
                return Err(e);
            }
        };

        let pid = match &env.pid_file {
            Some(path) => Some(PidFile::create(path.clone())?),
            None => None,
        };

        let (queue, events) = event_queue();
        let pool = Arc::new(ConnectionPool::new(queue.clone()));
        let published = Arc::new(RwLock::new(registry.configs()));
        let session = chrono::Utc::now().timestamp_millis();

        let node = StorageNode {
            env,
            me,
            network,
            registry,
            pool,
            queue,
            coordinators: HashMap::new(),
            request_counter: 0,
            session,
            results_dir,
            status,
            published,
            _pid: pid,
        };
        Ok((node, events, listener))
    }

    /// The node loop: accept connections, drain the event queue, survive
    /// handler failures, and shut down gracefully when told to.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<NodeEvent>,
        listener: TcpListener,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let listener_task = spawn_listener(listener, self.queue.clone());
        self.status.set("Online");
        tracing::info!("{} online", self.me);

        loop {
            tokio::select! {
                envelope = events.recv() => match envelope {
                    Some(envelope) => self.dispatch(envelope).await,
                    None => break,
                },
                _ = &mut shutdown => break,
            }
        }

        self.status.set("ShuttingDown");
        listener_task.abort();
        self.pool.drain();
        self.registry.snapshot();
        tracing::info!("{} stopped", self.me);
    }

    async fn dispatch(&mut self, envelope: NodeEvent) {
        match envelope {
            NodeEvent::Wire { event, source } => {
                if let Err(e) = self.handle_event(event, source).await {
                    tracing::error!("event handler failed, node is still up: {}", e);
                }
            }
            NodeEvent::Deadline { request_id } => self.handle_deadline(request_id),
            NodeEvent::Disconnected { peer } => self.handle_disconnect(peer),
        }
    }

    async fn handle_event(&mut self, event: Event, source: EventSource) -> Result<()> {
        match event {
            Event::StorageRequest { block } => self.handle_storage_request(block).await,
            Event::StorageEvent { block } => self.handle_storage_event(block),
            Event::QueryRequest {
                filesystem,
                polygon,
                time,
                feature_predicate,
                metadata_predicate,
                interactive,
                dry_run,
            } => {
                self.handle_query_request(
                    filesystem,
                    polygon,
                    time,
                    feature_predicate,
                    metadata_predicate,
                    interactive,
                    dry_run,
                    source,
                )
                .await
            }
            Event::QueryEvent {
                query_id,
                filesystem,
                polygon,
                time_window,
                feature_predicate,
                metadata_predicate,
                interactive,
                dry_run,
            } => self.handle_query_event(
                query_id,
                filesystem,
                polygon,
                time_window,
                feature_predicate,
                metadata_predicate,
                interactive,
                dry_run,
                source,
            ),
            Event::QueryResponse { .. } | Event::MetadataResponse { .. } => {
                self.route_response(event);
                Ok(())
            }
            Event::MetadataRequest { kind, filesystems } => {
                self.handle_metadata_request(kind, filesystems, source).await
            }
            Event::MetadataEvent {
                request_id,
                kind,
                filesystems,
            } => {
                self.handle_metadata_event(request_id, kind, filesystems, source);
                Ok(())
            }
            Event::FilesystemRequest { action, config } => {
                self.handle_filesystem_request(action, config).await
            }
            Event::FilesystemEvent { action, config } => {
                self.handle_filesystem_event(action, config)
            }
        }
    }

    /// Client write: look the filesystem up, compute the one owner, and
    /// forward. Nothing is stored on this node unless it is the owner, in
    /// which case the forwarded event comes right back through the loop.
    async fn handle_storage_request(&mut self, block: Block) -> Result<()> {
        let config = match self.registry.get(&block.filesystem) {
            Some(store) => store.config().clone(),
            None => {
                tracing::warn!(
                    "no filesystem {} for storage request, ignoring block",
                    block.filesystem
                );
                return Ok(());
            }
        };
        let partitioner = self.partitioner(&config);
        let destination = partitioner.locate_data(&block.metadata)?;
        tracing::info!("storage destination for {}: {}", block.filesystem, destination);
        let outcome = self
            .pool
            .send(&destination, Event::StorageEvent { block })
            .await;
        if !outcome.delivered() {
            return Err(NodeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("could not forward block to {}", destination),
            )));
        }
        Ok(())
    }

    /// Peer write: this node is the owner, store locally.
    fn handle_storage_event(&mut self, block: Block) -> Result<()> {
        let store = self
            .registry
            .get_mut(&block.filesystem)
            .ok_or_else(|| NodeError::NotFound(format!("filesystem {}", block.filesystem)))?;
        let path = store.store_block(&block)?;
        tracing::info!("stored block for {} at {}", block.filesystem, path);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_query_request(
        &mut self,
        filesystem: String,
        polygon: Option<Vec<Coordinates>>,
        time: Option<String>,
        feature_predicate: Option<Predicate>,
        metadata_predicate: Option<Predicate>,
        interactive: bool,
        dry_run: bool,
        source: EventSource,
    ) -> Result<()> {
        let query_id = self.next_request_id();
        let client = match source {
            EventSource::Connection { reply, .. } => reply,
            EventSource::Local => return Ok(()),
        };

        let config = match self.registry.get(&filesystem) {
            Some(store) => store.config().clone(),
            None => {
                client.send(error_response(
                    &query_id,
                    &self.me.address(),
                    format!("unknown filesystem {}", filesystem),
                ));
                return Ok(());
            }
        };

        let time_window = match &time {
            Some(expr) => {
                match parse_time_window(expr, config.temporal_type, self.env.allow_time_wildcards)
                {
                    Ok(window) => window,
                    Err(e) => {
                        client.send(error_response(&query_id, &self.me.address(), e.to_string()));
                        return Ok(());
                    }
                }
            }
            None => None,
        };

        let placement_meta = Metadata {
            timestamp_ms: time_window.map(|(start, _)| start),
            spatial: polygon.clone().map(SpatialProperties::Polygon),
            features: vec![],
        };
        let destinations = match self.partitioner(&config).find_destinations(&placement_meta) {
            Ok(destinations) => destinations,
            Err(e) => {
                tracing::error!("{}: could not identify destinations: {}", query_id, e);
                client.send(error_response(&query_id, &self.me.address(), e.to_string()));
                return Ok(());
            }
        };
        tracing::info!("{}: fanning out to {} destinations", query_id, destinations.len());

        let event = Event::QueryEvent {
            query_id: query_id.clone(),
            filesystem,
            polygon,
            time_window,
            feature_predicate,
            metadata_predicate,
            interactive,
            dry_run,
        };
        let mut coordinator = RequestCoordinator::query(
            query_id,
            self.me.address(),
            client,
            Some(self.env.query_timeout),
        );
        coordinator.dispatch(&self.pool, &destinations, event).await;
        self.register(coordinator);
        Ok(())
    }

    /// Subquery from a peer: list matching blocks on the loop, then hand
    /// the disk scan to a worker that replies through this connection.
    #[allow(clippy::too_many_arguments)]
    fn handle_query_event(
        &mut self,
        query_id: String,
        filesystem: String,
        polygon: Option<Vec<Coordinates>>,
        time_window: Option<(i64, i64)>,
        feature_predicate: Option<Predicate>,
        metadata_predicate: Option<Predicate>,
        interactive: bool,
        dry_run: bool,
        source: EventSource,
    ) -> Result<()> {
        let host = self.me.address();
        let reply = match &source {
            EventSource::Connection { reply, .. } => reply.clone(),
            EventSource::Local => return Ok(()),
        };

        let store = match self.registry.get(&filesystem) {
            Some(store) => store,
            None => {
                reply.send(Event::QueryResponse {
                    query_id,
                    payload: QueryPayload::Error {
                        host,
                        message: format!("unknown filesystem {}", filesystem),
                    },
                });
                return Ok(());
            }
        };

        let blocks = store.list_blocks(
            time_window,
            polygon.as_deref(),
            metadata_predicate.as_ref(),
        )?;
        if dry_run {
            reply.send(Event::QueryResponse {
                query_id,
                payload: QueryPayload::Blocks { host, blocks },
            });
            return Ok(());
        }

        let schema = store.config().feature_schema.clone();
        let paths: Vec<String> = blocks.into_values().flatten().collect();
        let spool_path = self
            .results_dir
            .join(format!("{}-{}.json", filesystem, query_id));

        tokio::spawn(async move {
            let scanned = tokio::task::spawn_blocking(move || {
                scan_and_spool(
                    paths,
                    schema,
                    feature_predicate,
                    interactive,
                    spool_path,
                    host.clone(),
                )
                .map_err(|e| (host, e))
            })
            .await;
            let payload = match scanned {
                Ok(Ok(payload)) => payload,
                Ok(Err((host, e))) => QueryPayload::Error {
                    host,
                    message: e.to_string(),
                },
                Err(e) => QueryPayload::Error {
                    host: String::new(),
                    message: format!("scan worker died: {}", e),
                },
            };
            reply.send(Event::QueryResponse { query_id, payload });
        });
        Ok(())
    }

    /// Fan a metadata event out over every node and merge the replies.
    async fn handle_metadata_request(
        &mut self,
        kind: MetadataKind,
        filesystems: Vec<String>,
        source: EventSource,
    ) -> Result<()> {
        let request_id = self.next_request_id();
        let client = match source {
            EventSource::Connection { reply, .. } => reply,
            EventSource::Local => return Ok(()),
        };
        let destinations = self.network.all_nodes();
        let event = Event::MetadataEvent {
            request_id: request_id.clone(),
            kind,
            filesystems,
        };
        let mut coordinator =
            RequestCoordinator::metadata(request_id, self.me.address(), client, kind);
        coordinator.dispatch(&self.pool, &destinations, event).await;
        self.register(coordinator);
        Ok(())
    }

    fn handle_metadata_event(
        &mut self,
        request_id: String,
        kind: MetadataKind,
        filesystems: Vec<String>,
        source: EventSource,
    ) {
        let result = self.local_metadata(kind, &filesystems);
        let result_json = serde_json::to_string(&result).ok();
        source.reply(Event::MetadataResponse {
            request_id,
            kind,
            host: self.me.address(),
            result_json,
            error: None,
            missing: vec![],
        });
    }

    /// Admin request: rebroadcast to every node, self included, so the
    /// whole cluster applies the same registry mutation.
    async fn handle_filesystem_request(
        &mut self,
        action: FilesystemAction,
        config: FilesystemConfig,
    ) -> Result<()> {
        let event = Event::FilesystemEvent { action, config };
        for node in self.network.all_nodes() {
            tracing::info!("requesting {} to apply a filesystem action", node);
            let outcome = self.pool.send(&node, event.clone()).await;
            if !outcome.delivered() {
                tracing::error!("filesystem event not delivered to {}", node);
            }
        }
        Ok(())
    }

    fn handle_filesystem_event(
        &mut self,
        action: FilesystemAction,
        config: FilesystemConfig,
    ) -> Result<()> {
        tracing::info!("applying {:?} for filesystem {}", action, config.name);
        match action {
            FilesystemAction::Create => self.registry.create(config)?,
            FilesystemAction::Delete => self.registry.delete(&config.name)?,
        }
        if let Ok(mut published) = self.published.write() {
            *published = self.registry.configs();
        }
        Ok(())
    }

    /// Replies are correlated by id, never by connection; unknown ids are
    /// dropped.
    fn route_response(&mut self, event: Event) {
        let id = match &event {
            Event::QueryResponse { query_id, .. } => query_id.clone(),
            Event::MetadataResponse { request_id, .. } => request_id.clone(),
            _ => return,
        };
        match self.coordinators.get_mut(&id) {
            Some(coordinator) => {
                if coordinator.on_response(&event) {
                    self.coordinators.remove(&id);
                }
            }
            None => tracing::warn!("response for unknown request {}, dropping", id),
        }
    }

    fn handle_deadline(&mut self, request_id: String) {
        if let Some(mut coordinator) = self.coordinators.remove(&request_id) {
            coordinator.on_deadline();
        }
    }

    fn handle_disconnect(&mut self, peer: String) {
        self.pool.evict(&peer);
        let mut finished = Vec::new();
        for (id, coordinator) in self.coordinators.iter_mut() {
            if coordinator.client_gone() {
                coordinator.cancel();
                tracing::info!("cancelled {} after client disconnect", id);
                finished.push(id.clone());
            } else if coordinator.on_peer_gone(&peer) {
                finished.push(id.clone());
            }
        }
        for id in finished {
            self.coordinators.remove(&id);
        }
    }

    fn register(&mut self, coordinator: RequestCoordinator) {
        if coordinator.is_complete() {
            return;
        }
        if let Some(deadline) = coordinator.deadline() {
            let queue = self.queue.clone();
            let request_id = coordinator.id().to_owned();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                queue.send(NodeEvent::Deadline { request_id });
            });
        }
        self.coordinators
            .insert(coordinator.id().to_owned(), coordinator);
    }

    fn local_metadata(&self, kind: MetadataKind, filesystems: &[String]) -> serde_json::Value {
        let wanted =
            |name: &str| filesystems.is_empty() || filesystems.iter().any(|f| f == name);
        let items: Vec<serde_json::Value> = match kind {
            MetadataKind::Filesystem => self
                .registry
                .configs()
                .iter()
                .filter(|c| wanted(&c.name))
                .map(|c| serde_json::to_value(c).unwrap_or(serde_json::Value::Null))
                .collect(),
            MetadataKind::Features => self
                .registry
                .configs()
                .iter()
                .filter(|c| wanted(&c.name))
                .map(|c| {
                    serde_json::json!({
                        "filesystem": c.name,
                        "features": c.feature_schema,
                    })
                })
                .collect(),
            MetadataKind::Overview => {
                let mut stores: Vec<_> = self
                    .registry
                    .stores()
                    .filter(|s| wanted(&s.config().name))
                    .collect();
                stores.sort_by(|a, b| a.config().name.cmp(&b.config().name));
                stores.iter().map(|s| s.overview()).collect()
            }
        };
        serde_json::Value::Array(items)
    }

    fn partitioner(&self, config: &FilesystemConfig) -> Partitioner {
        Partitioner::new(
            self.network.clone(),
            config.spatial_precision,
            config.temporal_type,
            config.nodes_per_group,
        )
    }

    fn next_request_id(&mut self) -> String {
        self.request_counter += 1;
        format!(
            "{}-{}-{}-{}",
            self.me.hostname, self.me.port, self.session, self.request_counter
        )
    }
}

fn error_response(query_id: &str, host: &str, message: String) -> Event {
    let mut aggregate = QueryAggregate::default();
    aggregate.errors.insert(host.to_owned(), message);
    Event::QueryResponse {
        query_id: query_id.to_owned(),
        payload: QueryPayload::Aggregate(aggregate),
    }
}

/// Worker-side scan: read the listed blocks, apply the feature predicate,
/// and either keep the rows in memory (interactive) or spool them to a
/// JSON file whose descriptor goes back instead. Pure over its inputs.
fn scan_and_spool(
    paths: Vec<String>,
    schema: Vec<FeatureDef>,
    predicate: Option<Predicate>,
    interactive: bool,
    spool_path: PathBuf,
    host: String,
) -> Result<QueryPayload> {
    let started = Instant::now();
    let feature_names: Vec<String> = schema.iter().map(|f| f.name.clone()).collect();
    let rows = scan_blocks(&paths, &schema, predicate.as_ref())?;

    if interactive {
        return Ok(QueryPayload::Rows {
            host,
            features: feature_names,
            rows,
        });
    }
    if rows.is_empty() {
        return Ok(QueryPayload::Spool {
            host,
            file: None,
            result_size: 0,
        });
    }

    let mut document = Vec::with_capacity(rows.len() + 1);
    document.push(feature_names);
    document.extend(rows.iter().cloned());
    let text = serde_json::to_string(&document)
        .map_err(|e| NodeError::Serialization(e.to_string()))?;
    fs::write(&spool_path, &text)?;

    Ok(QueryPayload::Spool {
        host: host.clone(),
        file: Some(SpoolInfo {
            host,
            path: spool_path.to_string_lossy().into_owned(),
            size: text.len() as u64,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }),
        result_size: rows.len() as u64,
    })
}
