//! Route table synchronization between worker records and the load balancer.
//!
//! `RouteSync` renders the full config from the current records on every
//! call and only touches the load balancer when the text differs from
//! what it last published successfully. A failed write or reload keeps
//! the change pending, so the next call tries again.

use std::path::Path;

use tracing::{debug, info, warn};

use fleet_core::WorkerRecord;
use fleet_core::config::FleetConfig;

use crate::error::{ProxyError, ProxyResult};
use crate::table::{RoutingTable, default_header};
use crate::writer::RouteTableWriter;

/// Owns the route table writer and the last published config text.
pub struct RouteSync<W> {
    writer: W,
    header: String,
    address: String,
    last_published: Option<String>,
}

impl<W: RouteTableWriter> RouteSync<W> {
    pub fn new(writer: W, header: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            writer,
            header: header.into(),
            address: address.into(),
            last_published: None,
        }
    }

    /// Build from config, reading the header template if one is set.
    pub fn from_config(writer: W, config: &FleetConfig) -> ProxyResult<Self> {
        let header = match &config.route_table.template_path {
            Some(path) => read_template(path)?,
            None => default_header(&config.server.address, config.server.listen_port),
        };
        Ok(Self::new(writer, header, config.server.address.clone()))
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// The text most recently published successfully.
    pub fn last_published(&self) -> Option<&str> {
        self.last_published.as_deref()
    }

    /// Render the config for `records` without publishing it.
    pub fn render(&self, records: &[WorkerRecord]) -> (RoutingTable, String) {
        let table = RoutingTable::from_records(records, &self.address);
        let text = table.render(&self.header);
        (table, text)
    }

    /// Publish the table for `records` if it changed since the last success.
    pub async fn sync(&mut self, records: &[WorkerRecord]) -> ProxyResult<SyncStats> {
        let (table, text) = self.render(records);
        let mut stats = SyncStats {
            routes: table.len() as u32,
            published: false,
        };

        if self.last_published.as_deref() == Some(text.as_str()) {
            debug!(routes = stats.routes, "route table unchanged");
            return Ok(stats);
        }

        self.writer.rewrite(&text).await?;
        self.writer.reload().await?;
        self.last_published = Some(text);
        stats.published = true;

        info!(
            routes = stats.routes,
            workers = ?table.entries.iter().map(|e| format!("{}={}", e.worker_id, e.weight)).collect::<Vec<_>>(),
            "route table published"
        );
        Ok(stats)
    }

    /// Like `sync`, but logs the failure instead of returning it.
    pub async fn sync_or_log(&mut self, records: &[WorkerRecord]) -> bool {
        match self.sync(records).await {
            Ok(stats) => stats.published,
            Err(e) => {
                warn!(error = %e, "route table publication failed, previous table stays live");
                false
            }
        }
    }
}

/// Sync statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub routes: u32,
    pub published: bool,
}

fn read_template(path: &Path) -> ProxyResult<String> {
    std::fs::read_to_string(path).map_err(|source| ProxyError::Template {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every call; fails when told to.
    #[derive(Default)]
    struct RecordingWriter {
        written: Mutex<Vec<String>>,
        reloads: Mutex<u32>,
        fail_reload: Mutex<bool>,
    }

    impl RouteTableWriter for RecordingWriter {
        async fn rewrite(&self, config_text: &str) -> ProxyResult<()> {
            self.written.lock().unwrap().push(config_text.to_string());
            Ok(())
        }

        async fn reload(&self) -> ProxyResult<()> {
            if *self.fail_reload.lock().unwrap() {
                return Err(ProxyError::Reload {
                    command: "reload".to_string(),
                    code: 1,
                    stderr: String::new(),
                });
            }
            *self.reloads.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn records() -> Vec<WorkerRecord> {
        vec![
            WorkerRecord::new("app1", 8011, 50.0),
            WorkerRecord::new("app2", 8012, 50.0),
        ]
    }

    #[tokio::test]
    async fn first_sync_publishes() {
        let mut sync = RouteSync::new(RecordingWriter::default(), "backend b\n", "10.0.0.1");
        let stats = sync.sync(&records()).await.unwrap();

        assert!(stats.published);
        assert_eq!(stats.routes, 2);
        assert_eq!(*sync.writer().reloads.lock().unwrap(), 1);
        assert!(sync.last_published().unwrap().contains("server app2  10.0.0.1:8012 weight 50"));
    }

    #[tokio::test]
    async fn unchanged_table_is_not_republished() {
        let mut sync = RouteSync::new(RecordingWriter::default(), "backend b\n", "h");
        sync.sync(&records()).await.unwrap();
        let stats = sync.sync(&records()).await.unwrap();

        assert!(!stats.published);
        assert_eq!(sync.writer().written.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn weight_change_is_republished() {
        let mut sync = RouteSync::new(RecordingWriter::default(), "", "h");
        let mut recs = records();
        sync.sync(&recs).await.unwrap();

        recs[0].weight = 70.0;
        recs[1].weight = 30.0;
        assert!(sync.sync(&recs).await.unwrap().published);

        let written = sync.writer().written.lock().unwrap();
        assert_eq!(written.len(), 2);
        assert!(written[1].contains("app1  h:8011 weight 70"));
    }

    #[tokio::test]
    async fn failed_reload_is_retried() {
        let mut sync = RouteSync::new(RecordingWriter::default(), "", "h");
        *sync.writer().fail_reload.lock().unwrap() = true;
        assert!(!sync.sync_or_log(&records()).await);
        assert!(sync.last_published().is_none());

        *sync.writer().fail_reload.lock().unwrap() = false;
        assert!(sync.sync_or_log(&records()).await);
        assert_eq!(*sync.writer().reloads.lock().unwrap(), 1);
    }

    #[test]
    fn from_config_reads_template() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("header.cfg");
        std::fs::write(&template, "backend custom\n").unwrap();

        let mut config = FleetConfig::default();
        config.route_table.template_path = Some(template);
        let sync = RouteSync::from_config(RecordingWriter::default(), &config).unwrap();

        let (_, text) = sync.render(&records());
        assert!(text.starts_with("backend custom\n    server app1"));
    }

    #[test]
    fn from_config_missing_template_fails() {
        let mut config = FleetConfig::default();
        config.route_table.template_path = Some("/nonexistent/header.cfg".into());
        let err = RouteSync::from_config(RecordingWriter::default(), &config).err().unwrap();
        assert!(matches!(err, ProxyError::Template { .. }));
    }
}
