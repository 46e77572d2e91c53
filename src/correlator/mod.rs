//! Switch and port topology built from OpenFlow counter records, with example
//! packet headers attached to ports by interface index.

mod layers;

use std::collections::VecDeque;
use std::net::IpAddr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sflow::{CounterRecord, CounterSample, Datagram, DatapathId, FlowSample, IfCounters};

pub use layers::{EthernetDecoder, Layer, LayerDecoder, MacAddr};

const fn default_max_example_headers() -> usize {
    16
}

const fn default_max_pending_interfaces() -> usize {
    256
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CorrelatorConfig {
    /// Example headers kept per port, the oldest is evicted first.
    #[serde(default = "default_max_example_headers")]
    pub max_example_headers: usize,

    /// Interface indexes whose headers are held until a port with that
    /// index shows up. The interface parked first is evicted first.
    #[serde(default = "default_max_pending_interfaces")]
    pub max_pending_interfaces: usize,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        CorrelatorConfig {
            max_example_headers: default_max_example_headers(),
            max_pending_interfaces: default_max_pending_interfaces(),
        }
    }
}

/// The agent that sent the latest counter sample naming a port.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct PortSource {
    pub agent_address: IpAddr,
    pub sub_agent_id: u32,
    pub sequence_number: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct Port<T> {
    pub name: String,
    pub if_index: u32,
    pub source: PortSource,
    /// Generic interface counters, from the latest counter sample naming
    /// this port that carried them.
    pub counters: Option<IfCounters>,
    pub example_headers: VecDeque<T>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Switch<T> {
    pub datapath_id: DatapathId,
    /// Keyed by port name, in the order ports were first seen.
    pub ports: IndexMap<String, Port<T>>,
}

/// What a single `Correlator::ingest` call changed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct IngestSummary {
    pub switches_added: usize,
    pub ports_added: usize,
    pub headers_attached: usize,
    pub headers_pending: usize,
}

/// An owned copy of the registry, for rendering.
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot<T> {
    pub switches: Vec<Switch<T>>,
    pub pending_interfaces: Vec<u32>,
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, cap: usize) {
    if cap == 0 {
        return;
    }

    while ring.len() >= cap {
        ring.pop_front();
    }
    ring.push_back(item);
}

/// Registry of switches keyed by datapath id.
///
/// A datapath id record and a port name record are paired only inside one
/// counter sample, in that order, and the port takes the interface index of
/// the sample's source. Switches and ports are never removed.
pub struct Correlator<D: LayerDecoder> {
    decoder: D,
    config: CorrelatorConfig,
    switches: IndexMap<DatapathId, Switch<D::Output>>,
    pending: IndexMap<u32, VecDeque<D::Output>>,
}

impl<D: LayerDecoder> Correlator<D> {
    pub fn new(decoder: D, config: CorrelatorConfig) -> Self {
        Correlator {
            decoder,
            config,
            switches: IndexMap::new(),
            pending: IndexMap::new(),
        }
    }

    /// Folds one datagram into the registry. Counter samples go first, so a
    /// port announced in the same datagram as a flow sample claims its
    /// headers straight away.
    ///
    /// Parked headers are released once all counter samples are folded, to
    /// every switch that has a port on that interface by then.
    pub fn ingest(&mut self, datagram: &Datagram) -> IngestSummary {
        let mut summary = IngestSummary::default();
        let mut created = Vec::new();

        for sample in &datagram.counter_samples {
            let source = PortSource {
                agent_address: datagram.agent_address,
                sub_agent_id: datagram.sub_agent_id,
                sequence_number: sample.sequence_number,
            };
            self.fold_counter_sample(sample, source, &mut created, &mut summary);
        }
        for if_index in created {
            self.release(if_index, &mut summary);
        }
        for sample in &datagram.flow_samples {
            self.fold_flow_sample(sample, &mut summary);
        }

        summary
    }

    fn fold_counter_sample(
        &mut self,
        sample: &CounterSample,
        source: PortSource,
        created: &mut Vec<u32>,
        summary: &mut IngestSummary,
    ) {
        let counters = sample.records.iter().find_map(|record| match record {
            CounterRecord::Interface(counters) => Some(counters),
            _ => None,
        });
        let mut current = None;

        for record in &sample.records {
            match record {
                CounterRecord::OpenFlowPort(port) => {
                    let datapath_id = port.datapath_id;
                    if !self.switches.contains_key(&datapath_id) {
                        info!(message = "New switch", %datapath_id);

                        self.switches.insert(
                            datapath_id,
                            Switch {
                                datapath_id,
                                ports: IndexMap::new(),
                            },
                        );
                        summary.switches_added += 1;
                    }

                    current = Some(datapath_id);
                }
                CounterRecord::OpenFlowPortName { name } => match current {
                    Some(datapath_id) => {
                        let if_index = sample.source.index;
                        if self.upsert_port(datapath_id, name, if_index, source, counters) {
                            summary.ports_added += 1;
                            created.push(if_index);
                        }
                    }
                    None => {
                        debug!(
                            message = "Port name without a datapath id",
                            %name,
                            sequence = sample.sequence_number
                        );
                    }
                },
                _ => {}
            }
        }
    }

    /// Creates the port, or refreshes its source and counters when it
    /// exists. Returns true when the port is new.
    fn upsert_port(
        &mut self,
        datapath_id: DatapathId,
        name: &str,
        if_index: u32,
        source: PortSource,
        counters: Option<&IfCounters>,
    ) -> bool {
        let Some(switch) = self.switches.get_mut(&datapath_id) else {
            return false;
        };

        if let Some(port) = switch.ports.get_mut(name) {
            port.source = source;
            if let Some(counters) = counters {
                port.counters = Some(counters.clone());
            }

            return false;
        }

        info!(
            message = "New port",
            %datapath_id,
            name,
            if_index,
            agent = %source.agent_address
        );

        switch.ports.insert(
            name.to_string(),
            Port {
                name: name.to_string(),
                if_index,
                source,
                counters: counters.cloned(),
                example_headers: VecDeque::new(),
            },
        );

        true
    }

    /// Moves the headers parked for `if_index` to the ports on it.
    fn release(&mut self, if_index: u32, summary: &mut IngestSummary) {
        let Some(parked) = self.pending.shift_remove(&if_index) else {
            return;
        };

        debug!(
            message = "Release pending headers",
            if_index,
            headers = parked.len()
        );

        for header in &parked {
            if self.attach(if_index, header) {
                summary.headers_attached += 1;
            }
        }
    }

    /// Appends the header to the first port on `if_index` of every switch.
    fn attach(&mut self, if_index: u32, header: &D::Output) -> bool {
        let cap = self.config.max_example_headers;
        let mut attached = false;

        for switch in self.switches.values_mut() {
            if let Some(port) = switch
                .ports
                .values_mut()
                .find(|port| port.if_index == if_index)
            {
                push_bounded(&mut port.example_headers, header.clone(), cap);
                attached = true;
            }
        }

        attached
    }

    fn fold_flow_sample(&mut self, sample: &FlowSample, summary: &mut IngestSummary) {
        if !sample.input.is_single() {
            return;
        }

        let if_index = sample.input.index;
        for raw in sample.raw_packets() {
            let decoded = self.decoder.decode(raw.header_protocol, &raw.header);

            if self.attach(if_index, &decoded) {
                summary.headers_attached += 1;
            } else if self.park(if_index, decoded) {
                summary.headers_pending += 1;
            }
        }
    }

    fn park(&mut self, if_index: u32, header: D::Output) -> bool {
        if self.config.max_pending_interfaces == 0 || self.config.max_example_headers == 0 {
            return false;
        }

        if !self.pending.contains_key(&if_index)
            && self.pending.len() >= self.config.max_pending_interfaces
            && let Some((evicted, headers)) = self.pending.shift_remove_index(0)
        {
            debug!(
                message = "Evict pending headers",
                if_index = evicted,
                headers = headers.len()
            );
        }

        let parked = self.pending.entry(if_index).or_default();
        push_bounded(parked, header, self.config.max_example_headers);

        true
    }

    pub fn switches(&self) -> impl Iterator<Item = &Switch<D::Output>> {
        self.switches.values()
    }

    pub fn switch(&self, datapath_id: &DatapathId) -> Option<&Switch<D::Output>> {
        self.switches.get(datapath_id)
    }

    /// Ports of a switch, empty when the switch is unknown.
    pub fn ports(&self, datapath_id: &DatapathId) -> impl Iterator<Item = &Port<D::Output>> {
        self.switches
            .get(datapath_id)
            .into_iter()
            .flat_map(|switch| switch.ports.values())
    }

    pub fn example_headers(
        &self,
        datapath_id: &DatapathId,
        name: &str,
    ) -> Option<&VecDeque<D::Output>> {
        self.switches
            .get(datapath_id)
            .and_then(|switch| switch.ports.get(name))
            .map(|port| &port.example_headers)
    }

    /// Interface indexes with headers waiting for a port, oldest first.
    pub fn pending_interfaces(&self) -> impl Iterator<Item = u32> {
        self.pending.keys().copied()
    }

    pub fn snapshot(&self) -> Snapshot<D::Output> {
        Snapshot {
            switches: self.switches.values().cloned().collect(),
            pending_interfaces: self.pending_interfaces().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use pretty_assertions::assert_eq;
    use testify::wire::{self, Writer};

    use super::*;

    const SWITCH_A: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 0xa];
    const SWITCH_B: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 0xb];

    /// Keeps the header bytes as they are.
    struct Bytes;

    impl LayerDecoder for Bytes {
        type Output = Vec<u8>;

        fn decode(&self, _protocol: u32, header: &[u8]) -> Vec<u8> {
            header.to_vec()
        }
    }

    fn correlator() -> Correlator<Bytes> {
        Correlator::new(Bytes, CorrelatorConfig::default())
    }

    fn datagram(samples: &[Vec<u8>]) -> Datagram {
        Datagram::decode(wire::datagram(Ipv4Addr::new(10, 0, 0, 1), 1, samples)).unwrap()
    }

    fn port_sample(datapath_id: [u8; 8], name: &str, if_index: u32) -> Vec<u8> {
        wire::counter_sample(
            1,
            if_index,
            &[
                wire::of_port_record(datapath_id, if_index),
                wire::of_port_name_record(name),
            ],
        )
    }

    fn header_sample(input: u32, header: &[u8]) -> Vec<u8> {
        wire::flow_sample(1, input, input, 0, &[wire::raw_packet_record(header)])
    }

    fn headers(correlator: &Correlator<Bytes>, datapath_id: [u8; 8], name: &str) -> Vec<Vec<u8>> {
        correlator
            .example_headers(&DatapathId(datapath_id), name)
            .map(|headers| headers.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[test]
    fn switch_dedup() {
        let mut correlator = correlator();
        let sample = wire::counter_sample(1, 3, &[wire::of_port_record(SWITCH_A, 3)]);

        let summary = correlator.ingest(&datagram(&[sample.clone(), sample.clone()]));
        assert_eq!(summary.switches_added, 1);

        let summary = correlator.ingest(&datagram(&[sample]));
        assert_eq!(summary, IngestSummary::default());
        assert_eq!(correlator.switches().count(), 1);
        assert_eq!(correlator.ports(&DatapathId(SWITCH_A)).count(), 0);
    }

    #[test]
    fn port_from_counter_sample() {
        let mut correlator = correlator();
        let datagram = datagram(&[port_sample(SWITCH_A, "eth0", 7)]);

        let summary = correlator.ingest(&datagram);
        assert_eq!(
            summary,
            IngestSummary {
                switches_added: 1,
                ports_added: 1,
                ..Default::default()
            }
        );

        // again, nothing changes
        assert_eq!(correlator.ingest(&datagram), IngestSummary::default());

        let ports = correlator
            .ports(&DatapathId(SWITCH_A))
            .map(|port| (port.name.as_str(), port.if_index))
            .collect::<Vec<_>>();
        assert_eq!(ports, vec![("eth0", 7)]);
    }

    #[test]
    fn existing_port_keeps_its_index() {
        let mut correlator = correlator();
        correlator.ingest(&datagram(&[port_sample(SWITCH_A, "eth0", 7)]));
        correlator.ingest(&datagram(&[port_sample(SWITCH_A, "eth0", 9)]));

        let port = correlator
            .switch(&DatapathId(SWITCH_A))
            .and_then(|switch| switch.ports.get("eth0"))
            .unwrap();
        assert_eq!(port.if_index, 7);
    }

    fn if_counters_record(if_index: u32, in_octets: u64) -> Vec<u8> {
        let body = Writer::new()
            .u32(if_index)
            .u32(6) // ethernetCsmacd
            .u64(10_000_000_000)
            .u32(1) // full duplex
            .u32(3) // up
            .u64(in_octets)
            .bytes(&[0; 24])
            .u64(0) // out octets
            .bytes(&[0; 24])
            .finish();

        wire::record(0, sflow::COUNTER_TYPE_IF, &body)
    }

    #[test]
    fn port_keeps_latest_counters() {
        let mut correlator = correlator();
        let sample = |sequence, in_octets: Option<u64>| {
            let mut records = Vec::new();
            if let Some(in_octets) = in_octets {
                records.push(if_counters_record(7, in_octets));
            }
            records.push(wire::of_port_record(SWITCH_A, 7));
            records.push(wire::of_port_name_record("eth0"));

            wire::counter_sample(sequence, 7, &records)
        };
        let port = |correlator: &Correlator<Bytes>| {
            correlator
                .ports(&DatapathId(SWITCH_A))
                .next()
                .cloned()
                .unwrap()
        };

        correlator.ingest(&datagram(&[sample(1, Some(100))]));
        let first = port(&correlator);
        assert_eq!(first.counters.map(|counters| counters.if_in_octets), Some(100));
        assert_eq!(
            first.source,
            PortSource {
                agent_address: Ipv4Addr::new(10, 0, 0, 1).into(),
                sub_agent_id: 0,
                sequence_number: 1,
            }
        );

        let agent = Ipv4Addr::new(10, 0, 0, 2);
        let next = Datagram::decode(wire::datagram(agent, 2, &[sample(2, Some(250))])).unwrap();
        assert_eq!(correlator.ingest(&next), IngestSummary::default());
        let second = port(&correlator);
        assert_eq!(second.if_index, 7);
        assert_eq!(second.source.agent_address, agent);
        assert_eq!(second.source.sequence_number, 2);
        assert_eq!(second.counters.map(|counters| counters.if_in_octets), Some(250));

        // a sample without interface counters leaves the last ones in place
        correlator.ingest(&datagram(&[sample(3, None)]));
        let third = port(&correlator);
        assert_eq!(third.source.sequence_number, 3);
        assert_eq!(third.counters.map(|counters| counters.if_in_octets), Some(250));
    }

    #[test]
    fn name_before_datapath_id_is_dropped() {
        let mut correlator = correlator();
        let sample = wire::counter_sample(
            1,
            7,
            &[
                wire::of_port_name_record("eth0"),
                wire::of_port_record(SWITCH_A, 7),
            ],
        );

        let summary = correlator.ingest(&datagram(&[sample]));
        assert_eq!(summary.switches_added, 1);
        assert_eq!(summary.ports_added, 0);
        assert_eq!(correlator.ports(&DatapathId(SWITCH_A)).count(), 0);
    }

    #[test]
    fn pairing_does_not_cross_samples() {
        let mut correlator = correlator();
        let datagram = datagram(&[
            wire::counter_sample(1, 7, &[wire::of_port_record(SWITCH_A, 7)]),
            wire::counter_sample(2, 7, &[wire::of_port_name_record("eth0")]),
        ]);

        let summary = correlator.ingest(&datagram);
        assert_eq!(summary.ports_added, 0);
    }

    #[test]
    fn latest_datapath_id_wins() {
        let mut correlator = correlator();
        let sample = wire::counter_sample(
            1,
            4,
            &[
                wire::of_port_record(SWITCH_A, 4),
                wire::of_port_record(SWITCH_B, 4),
                wire::of_port_name_record("eth4"),
            ],
        );

        correlator.ingest(&datagram(&[sample]));
        assert_eq!(correlator.ports(&DatapathId(SWITCH_A)).count(), 0);
        assert_eq!(correlator.ports(&DatapathId(SWITCH_B)).count(), 1);
    }

    #[test]
    fn header_attaches_to_port() {
        let mut correlator = correlator();
        correlator.ingest(&datagram(&[port_sample(SWITCH_A, "eth0", 7)]));

        let summary = correlator.ingest(&datagram(&[header_sample(7, &[1; 14])]));
        assert_eq!(summary.headers_attached, 1);
        assert_eq!(headers(&correlator, SWITCH_A, "eth0"), vec![vec![1; 14]]);

        // no port on interface 8
        let summary = correlator.ingest(&datagram(&[header_sample(8, &[2; 14])]));
        assert_eq!(summary.headers_attached, 0);
        assert_eq!(summary.headers_pending, 1);
        assert_eq!(headers(&correlator, SWITCH_A, "eth0").len(), 1);
    }

    #[test]
    fn header_before_port() {
        let mut correlator = correlator();

        let summary = correlator.ingest(&datagram(&[header_sample(7, &[1; 14])]));
        assert_eq!(summary.headers_pending, 1);
        assert_eq!(correlator.pending_interfaces().collect::<Vec<_>>(), vec![7]);

        let summary = correlator.ingest(&datagram(&[port_sample(SWITCH_A, "eth0", 7)]));
        assert_eq!(summary.headers_attached, 1);
        assert_eq!(headers(&correlator, SWITCH_A, "eth0"), vec![vec![1; 14]]);
        assert_eq!(correlator.pending_interfaces().count(), 0);
    }

    #[test]
    fn parked_header_reaches_every_switch() {
        let ports = [
            port_sample(SWITCH_A, "eth0", 7),
            port_sample(SWITCH_B, "ge-0/0/7", 7),
        ];
        let header = header_sample(7, &[5; 14]);

        let mut ports_first = correlator();
        ports_first.ingest(&datagram(&ports));
        ports_first.ingest(&datagram(std::slice::from_ref(&header)));

        let mut header_first = correlator();
        header_first.ingest(&datagram(&[header]));
        let summary = header_first.ingest(&datagram(&ports));
        assert_eq!(summary.ports_added, 2);
        assert_eq!(summary.headers_attached, 1);
        assert_eq!(header_first.pending_interfaces().count(), 0);

        for correlator in [&ports_first, &header_first] {
            assert_eq!(headers(correlator, SWITCH_A, "eth0"), vec![vec![5; 14]]);
            assert_eq!(headers(correlator, SWITCH_B, "ge-0/0/7"), vec![vec![5; 14]]);
        }
    }

    #[test]
    fn counter_samples_fold_first() {
        let mut correlator = correlator();
        let summary = correlator.ingest(&datagram(&[
            header_sample(7, &[3; 14]),
            port_sample(SWITCH_A, "eth0", 7),
        ]));

        assert_eq!(summary.headers_attached, 1);
        assert_eq!(summary.headers_pending, 0);
        assert_eq!(headers(&correlator, SWITCH_A, "eth0"), vec![vec![3; 14]]);
    }

    #[test]
    fn header_attaches_to_every_switch() {
        let mut correlator = correlator();
        correlator.ingest(&datagram(&[
            port_sample(SWITCH_A, "eth0", 7),
            port_sample(SWITCH_B, "ge-0/0/7", 7),
        ]));

        let summary = correlator.ingest(&datagram(&[header_sample(7, &[4; 14])]));
        assert_eq!(summary.headers_attached, 1);
        assert_eq!(headers(&correlator, SWITCH_A, "eth0"), vec![vec![4; 14]]);
        assert_eq!(headers(&correlator, SWITCH_B, "ge-0/0/7"), vec![vec![4; 14]]);
    }

    #[test]
    fn example_headers_are_bounded() {
        let mut correlator = Correlator::new(
            Bytes,
            CorrelatorConfig {
                max_example_headers: 2,
                ..Default::default()
            },
        );
        correlator.ingest(&datagram(&[port_sample(SWITCH_A, "eth0", 7)]));
        correlator.ingest(&datagram(&[
            header_sample(7, &[1; 4]),
            header_sample(7, &[2; 4]),
            header_sample(7, &[3; 4]),
        ]));

        assert_eq!(
            headers(&correlator, SWITCH_A, "eth0"),
            vec![vec![2; 4], vec![3; 4]]
        );
    }

    #[test]
    fn pending_interfaces_are_bounded() {
        let mut correlator = Correlator::new(
            Bytes,
            CorrelatorConfig {
                max_pending_interfaces: 2,
                ..Default::default()
            },
        );
        correlator.ingest(&datagram(&[
            header_sample(1, &[1; 4]),
            header_sample(2, &[2; 4]),
            header_sample(1, &[1; 4]),
            header_sample(3, &[3; 4]),
        ]));

        assert_eq!(
            correlator.pending_interfaces().collect::<Vec<_>>(),
            vec![2, 3]
        );

        let mut correlator = Correlator::new(
            Bytes,
            CorrelatorConfig {
                max_pending_interfaces: 0,
                ..Default::default()
            },
        );
        let summary = correlator.ingest(&datagram(&[header_sample(1, &[1; 4])]));
        assert_eq!(summary.headers_pending, 0);
        assert_eq!(correlator.pending_interfaces().count(), 0);
    }

    #[test]
    fn multi_interface_input_is_ignored() {
        let mut correlator = correlator();
        correlator.ingest(&datagram(&[port_sample(SWITCH_A, "eth0", 7)]));

        let body = Writer::new()
            .u32(1) // sequence
            .u32(7) // source
            .u32(1) // sampling rate
            .u32(1) // sample pool
            .u32(0) // dropped
            .u32(0x8000_0007) // input, format 2
            .u32(0) // output
            .u32(1)
            .bytes(&wire::raw_packet_record(&[1; 14]))
            .finish();
        let summary = correlator.ingest(&datagram(&[wire::sample(0, 1, &body)]));

        assert_eq!(summary, IngestSummary::default());
        assert!(headers(&correlator, SWITCH_A, "eth0").is_empty());
    }

    #[test]
    fn ethernet_layers() {
        let mut correlator = Correlator::new(EthernetDecoder, CorrelatorConfig::default());
        correlator.ingest(&datagram(&[port_sample(SWITCH_A, "eth0", 7)]));

        let mut frame = vec![0xff; 6];
        frame.extend_from_slice(&[0, 1, 2, 3, 4, 5]);
        frame.extend_from_slice(&[0x88, 0xcc]); // LLDP
        correlator.ingest(&datagram(&[header_sample(7, &frame)]));

        let headers = correlator
            .example_headers(&DatapathId(SWITCH_A), "eth0")
            .unwrap();
        assert_eq!(
            headers.front().unwrap(),
            &vec![Layer::Ethernet {
                source: MacAddr([0, 1, 2, 3, 4, 5]),
                destination: MacAddr([0xff; 6]),
                ether_type: 0x88cc,
            }]
        );
    }

    #[test]
    fn snapshot() {
        let mut correlator = correlator();
        correlator.ingest(&datagram(&[
            port_sample(SWITCH_A, "eth0", 7),
            header_sample(7, &[1, 2]),
            header_sample(9, &[3]),
        ]));

        let value = serde_json::to_value(correlator.snapshot()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "switches": [{
                    "datapath_id": "00:00:00:00:00:00:00:0a",
                    "ports": {
                        "eth0": {
                            "name": "eth0",
                            "if_index": 7,
                            "source": {
                                "agent_address": "10.0.0.1",
                                "sub_agent_id": 0,
                                "sequence_number": 1
                            },
                            "counters": null,
                            "example_headers": [[1, 2]]
                        }
                    }
                }],
                "pending_interfaces": [9]
            })
        );
    }
}
