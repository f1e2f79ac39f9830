//! Bidirectional NAT outbound handler
//!
//! The handler owns the rule engine, the session table, and a background
//! sweeper task. For each flow it resolves the destination against the
//! configured rules and ranges; matched flows are rewritten (DNAT), tracked
//! in the session table, and relayed to the real destination, while
//! everything else passes through to the original destination untouched.
//!
//! Session release is tied to flow lifetime: whichever way a flow ends
//! (clean close, transfer error, dial failure, cancellation), the session is
//! removed and the dialed connection dropped before the error surfaces.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::traits::{BoxedStream, Dialer};
use crate::config::NatOutboundConfig;
use crate::endpoint::Endpoint;
use crate::error::{ConfigError, FlowError};
use crate::flow::{dial_with_retry, Flow};
use crate::io::pipe_bidirectional;
use crate::rules::{ResolvedRule, RuleEngine};
use crate::session::{Direction, NatSession, SessionTable};
use crate::stats::{NatStats, NatStatsSnapshot};
use crate::transform;

/// Bidirectional NAT outbound handler
///
/// Constructed from a validated configuration; immutable afterwards apart
/// from the session table and counters. Safe to share across flow tasks.
pub struct NatHandler {
    engine: RuleEngine,
    sessions: Arc<SessionTable>,
    stats: Arc<NatStats>,
    shutdown_tx: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl NatHandler {
    /// Create a handler and start its session sweeper
    ///
    /// Must be called from within a Tokio runtime; the sweeper runs until
    /// [`close`](Self::close) or drop.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the configuration fails validation.
    pub fn new(config: &NatOutboundConfig) -> Result<Self, ConfigError> {
        let runtime = config.build()?;

        let stats = Arc::new(NatStats::new());
        let sessions = Arc::new(SessionTable::new(
            runtime.timeouts,
            runtime.limits,
            Arc::clone(&stats),
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Self::spawn_sweeper(Arc::clone(&sessions), shutdown_rx);

        info!(
            site_id = %runtime.site_id,
            rules = runtime.rules.len(),
            ranges = runtime.ranges.len(),
            capacity = sessions.capacity(),
            "NAT handler initialized"
        );

        Ok(Self {
            engine: RuleEngine::new(runtime.site_id, runtime.rules, runtime.ranges),
            sessions,
            stats,
            shutdown_tx,
            closed: AtomicBool::new(false),
        })
    }

    /// Process one flow to completion
    ///
    /// Resolves the destination, applies DNAT when a rule or range matches,
    /// dials, and relays bytes in both directions until the flow ends.
    ///
    /// # Errors
    ///
    /// Returns `FlowError` describing why the flow was aborted; resources
    /// are already released when it surfaces.
    pub async fn process(&self, flow: Flow, dialer: &dyn Dialer) -> Result<(), FlowError> {
        let result = self.process_inner(flow, dialer).await;
        if result.is_err() {
            self.stats.record_error();
        }
        result
    }

    async fn process_inner(&self, flow: Flow, dialer: &dyn Dialer) -> Result<(), FlowError> {
        let dest = flow.destination.clone().ok_or(FlowError::NoDestination)?;
        if !dest.address.is_ip() {
            return Err(FlowError::UnsupportedAddress(dest.address.to_string()));
        }

        match self.engine.resolve(&dest) {
            Some(resolved) => self.handle_nat_flow(flow, &dest, &resolved, dialer).await,
            None => self.handle_pass_through(flow, &dest, dialer).await,
        }
    }

    /// Relay a flow whose destination matched a rule or range
    async fn handle_nat_flow(
        &self,
        flow: Flow,
        dest: &Endpoint,
        resolved: &ResolvedRule,
        dialer: &dyn Dialer,
    ) -> Result<(), FlowError> {
        let real = transform::dnat(dest, resolved)?;
        let session = self
            .sessions
            .create(dest.clone(), real.clone(), Direction::Outbound)?;

        debug!(
            rule_id = %resolved.rule.rule_id,
            session_id = %session.id(),
            virtual_dest = %dest,
            real_dest = %real,
            "Applying DNAT"
        );

        let conn = match dial_with_retry(dialer, &real).await {
            Ok(conn) => conn,
            Err(e) => {
                self.sessions.remove(session.id());
                return Err(e);
            }
        };

        let result = self.relay(flow, conn, Some(&session)).await;
        self.sessions.remove(session.id());
        result
    }

    /// Relay a flow that matched nothing: dial the original destination
    async fn handle_pass_through(
        &self,
        flow: Flow,
        dest: &Endpoint,
        dialer: &dyn Dialer,
    ) -> Result<(), FlowError> {
        debug!(%dest, "No NAT rule matched, handling as normal outbound");
        let conn = dial_with_retry(dialer, dest).await?;
        self.relay(flow, conn, None).await
    }

    /// Run both copy directions until the flow ends
    ///
    /// The dialed connection is dropped (and thereby closed) on every exit
    /// path, including cancellation.
    async fn relay(
        &self,
        mut flow: Flow,
        mut conn: BoxedStream,
        session: Option<&Arc<NatSession>>,
    ) -> Result<(), FlowError> {
        let cancel = flow.cancel.clone();
        let on_activity = |n: u64| {
            self.stats.add_bytes(n);
            if let Some(session) = session {
                self.sessions.touch(session);
            }
        };

        let copied = tokio::select! {
            result = pipe_bidirectional(&mut flow.reader, &mut flow.writer, &mut conn, on_activity) => {
                result.map_err(FlowError::Transfer)?
            }
            () = cancel.cancelled() => return Err(FlowError::Cancelled),
        };

        debug!(
            up = copied.upstream_to_remote,
            down = copied.remote_to_upstream,
            "Flow completed"
        );
        Ok(())
    }

    /// Stop the sweeper
    ///
    /// In-flight flows are not drained; they complete on their own path.
    /// Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
            info!("NAT handler closed");
        }
    }

    /// Whether [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Handler statistics counters
    #[must_use]
    pub fn stats(&self) -> &NatStats {
        &self.stats
    }

    /// Snapshot of the statistics counters
    #[must_use]
    pub fn stats_snapshot(&self) -> NatStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of currently tracked sessions
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// The session table, for platform-side inspection
    #[must_use]
    pub fn session_table(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    fn spawn_sweeper(sessions: Arc<SessionTable>, mut shutdown_rx: broadcast::Receiver<()>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sessions.sweep_interval());
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = sessions.sweep(Instant::now());
                        if removed > 0 {
                            debug!(removed, active = sessions.len(), "Expired NAT sessions swept");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Session sweeper stopped");
                        break;
                    }
                }
            }
        });
    }
}

impl Drop for NatHandler {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for NatHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatHandler")
            .field("site_id", &self.engine.site_id())
            .field("active_sessions", &self.sessions.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
