//! Routing table — the load balancer's view of the pool.
//!
//! The table is always rebuilt from the full set of worker records and
//! rendered as a complete config file; it is never patched in place.

use std::fmt::Write as _;

use fleet_core::WorkerRecord;

/// One forwarding destination.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RouteEntry {
    pub worker_id: String,
    pub address: String,
    pub port: u16,
    /// Integer traffic weight, never below 1.
    pub weight: u32,
}

impl RouteEntry {
    /// Full address string.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Ordered destinations for every active worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RoutingTable {
    pub entries: Vec<RouteEntry>,
}

impl RoutingTable {
    /// Build the table from worker records, in record order.
    ///
    /// Draining and removed workers are left out.
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a WorkerRecord>,
        address: &str,
    ) -> Self {
        let entries = records
            .into_iter()
            .filter(|r| r.is_active())
            .map(|r| RouteEntry {
                worker_id: r.id.clone(),
                address: address.to_string(),
                port: r.route_port,
                weight: integer_weight(r.weight),
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the complete HAProxy config: the header followed by one
    /// `server` line per entry.
    pub fn render(&self, header: &str) -> String {
        let mut out = String::with_capacity(header.len() + self.entries.len() * 64);
        out.push_str(header);
        if !header.is_empty() && !header.ends_with('\n') {
            out.push('\n');
        }
        for entry in &self.entries {
            // Writing into a String cannot fail.
            let _ = writeln!(
                out,
                "    server {}  {} weight {}",
                entry.worker_id,
                entry.endpoint(),
                entry.weight
            );
        }
        out
    }
}

/// Round a percentage weight up to the integer HAProxy expects.
pub fn integer_weight(weight: f64) -> u32 {
    if !weight.is_finite() || weight <= 1.0 {
        return 1;
    }
    weight.ceil().min(f64::from(u32::MAX)) as u32
}

/// Built-in HAProxy header used when no template file is configured.
pub fn default_header(listen_address: &str, listen_port: u16) -> String {
    format!(
        "\
global
\tlog /dev/log\tlocal0
\tlog /dev/log\tlocal1 notice
\tchroot /var/lib/haproxy
\tstats socket /run/haproxy/admin.sock mode 660 level admin expose-fd listeners
\tstats timeout 30s
\tuser haproxy
\tgroup haproxy
\tdaemon

defaults
\tlog\tglobal
\tmode\thttp
\toption\thttplog
\toption\tdontlognull
\ttimeout connect 5000
\ttimeout client  50000
\ttimeout server  50000

frontend fleet_frontend
    bind {listen_address}:{listen_port}
    mode http
    default_backend fleet_workers

backend fleet_workers
    mode http
    balance roundrobin
    option forwardfor
    http-request set-header X-Forwarded-Port %[dst_port]
    http-request add-header X-Forwarded-Proto https if {{ ssl_fc }}
    option httpchk HEAD / HTTP/1.1\\r\\nHost:localhost
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, port: u16, weight: f64) -> WorkerRecord {
        WorkerRecord::new(id, port, weight)
    }

    #[test]
    fn only_active_workers_are_routed() {
        let mut draining = record("app2", 8012, 30.0);
        draining.start_draining();
        let mut removed = record("app3", 8013, 30.0);
        removed.mark_removed();
        let records = vec![record("app1", 8011, 40.0), draining, removed, record("app4", 8014, 30.0)];

        let table = RoutingTable::from_records(&records, "192.168.1.5");
        let ids: Vec<&str> = table.entries.iter().map(|e| e.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["app1", "app4"]);
        assert_eq!(table.entries[0].endpoint(), "192.168.1.5:8011");
    }

    #[test]
    fn weights_round_up_and_never_below_one() {
        assert_eq!(integer_weight(60.0), 60);
        assert_eq!(integer_weight(33.3334), 34);
        assert_eq!(integer_weight(0.2), 1);
        assert_eq!(integer_weight(0.0), 1);
        assert_eq!(integer_weight(f64::NAN), 1);
    }

    #[test]
    fn renders_server_lines_after_header() {
        let records = vec![record("app1", 8011, 66.6), record("app2", 8012, 33.4)];
        let table = RoutingTable::from_records(&records, "10.0.0.1");

        let text = table.render("backend web\n");
        assert_eq!(
            text,
            "backend web\n    server app1  10.0.0.1:8011 weight 67\n    server app2  10.0.0.1:8012 weight 34\n"
        );
    }

    #[test]
    fn header_without_trailing_newline_is_terminated() {
        let table = RoutingTable::from_records(&[record("app1", 8011, 100.0)], "h");
        assert!(table.render("backend web").starts_with("backend web\n    server app1"));
    }

    #[test]
    fn render_is_deterministic() {
        let records = vec![record("app1", 8011, 50.0), record("app2", 8012, 50.0)];
        let header = default_header("0.0.0.0", 80);
        let a = RoutingTable::from_records(&records, "h").render(&header);
        let b = RoutingTable::from_records(&records, "h").render(&header);
        assert_eq!(a, b);
    }

    #[test]
    fn default_header_binds_listen_address() {
        let header = default_header("192.168.1.5", 80);
        assert!(header.contains("bind 192.168.1.5:80"));
        assert!(header.contains("backend fleet_workers"));
        assert!(header.contains("if { ssl_fc }"));
        assert!(header.ends_with('\n'));
    }
}
