use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use sflow::{Datagram, DecodeOptions};
use tokio::time::{MissedTickBehavior, interval};

use crate::correlator::{Correlator, LayerDecoder};
use crate::source::PacketSource;

/// Largest UDP payload, datagrams are never reassembled
const MAX_DATAGRAM_SIZE: usize = 65535;

/// The correlator shared between the collector, which is the only writer,
/// and whoever wants to look at the topology.
pub type Registry<D> = Arc<RwLock<Correlator<D>>>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Stats {
    pub datagrams: u64,
    pub decode_errors: u64,
    pub dropped_samples: u64,
    pub headers_attached: u64,
}

pub struct Collector<S, D: LayerDecoder> {
    source: S,
    options: DecodeOptions,
    registry: Registry<D>,
    report_interval: Duration,
    stats: Stats,
}

impl<S: PacketSource, D: LayerDecoder> Collector<S, D> {
    pub fn new(
        source: S,
        options: DecodeOptions,
        correlator: Correlator<D>,
        report_interval: Duration,
    ) -> Self {
        Collector {
            source,
            options,
            registry: Arc::new(RwLock::new(correlator)),
            report_interval,
            stats: Stats::default(),
        }
    }

    pub fn registry(&self) -> Registry<D> {
        Arc::clone(&self.registry)
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Decode one payload and fold it into the registry. A payload that
    /// does not decode is counted and logged, nothing else.
    pub fn handle(&mut self, peer: SocketAddr, payload: &[u8]) {
        self.stats.datagrams += 1;

        let datagram = match Datagram::decode_with(payload, &self.options) {
            Ok(datagram) => datagram,
            Err(err) => {
                self.stats.decode_errors += 1;
                warn!(
                    message = "Decode datagram failed",
                    %peer,
                    %err
                );

                return;
            }
        };

        for dropped in &datagram.dropped {
            debug!(
                message = "Sample dropped",
                %peer,
                agent = %datagram.agent_address,
                sequence = datagram.sequence_number,
                index = dropped.index,
                tag = %dropped.tag,
                err = %dropped.error
            );
        }
        self.stats.dropped_samples += datagram.dropped.len() as u64;

        let summary = self.registry.write().ingest(&datagram);
        self.stats.headers_attached += summary.headers_attached as u64;

        trace!(
            message = "Datagram ingested",
            %peer,
            agent = %datagram.agent_address,
            sequence = datagram.sequence_number,
            flow_samples = datagram.flow_samples.len(),
            counter_samples = datagram.counter_samples.len(),
            ?summary
        );
    }

    fn report(&self) {
        let (switches, ports, pending) = {
            let registry = self.registry.read();
            (
                registry.switches().count(),
                registry
                    .switches()
                    .map(|switch| switch.ports.len())
                    .sum::<usize>(),
                registry.pending_interfaces().count(),
            )
        };

        info!(
            message = "Collector summary",
            datagrams = self.stats.datagrams,
            decode_errors = self.stats.decode_errors,
            dropped_samples = self.stats.dropped_samples,
            headers_attached = self.stats.headers_attached,
            switches,
            ports,
            pending
        );
    }

    /// Receive until the source is exhausted or `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Stats {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        // interval panics on a zero period
        let mut ticker = interval(self.report_interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,
                _ = ticker.tick() => self.report(),
                result = self.source.recv(&mut buf) => match result {
                    Ok(Some((len, peer))) => self.handle(peer, &buf[..len]),
                    Ok(None) => {
                        debug!(message = "Packet source exhausted");
                        break;
                    }
                    Err(err) => {
                        warn!(
                            message = "Error reading datagram",
                            %err
                        );
                    }
                },
            }
        }

        self.report();
        self.stats
    }
}
