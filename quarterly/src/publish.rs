//! Delivery of quarters to external reporting destinations.
//!
//! Each [`Destination`] owns one bit of a quarter's [`AckMask`]. A
//! reconciliation pass sends every quarter holding data to each destination
//! whose bit is still clear and sets the bit as soon as the destination
//! confirms. There is no retry queue: a failed delivery leaves the bit clear
//! and the next pass picks the quarter up again.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditSink, TIME_FORMAT, record_abort};
use crate::error::{PublishError, Result};
use crate::quarter::quarter_center;
use crate::sample::{AckMask, Quarter};
use crate::store::SampleStore;

/// Query parameters sent to a destination, in send order.
pub type Payload = Vec<(&'static str, String)>;

fn default_success_status() -> u16 {
    200
}

/// An external reporting endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Short code used in audit lines, e.g. `wu`.
    pub code: String,
    /// Bit of the acknowledgment mask owned by this destination.
    pub bit: u8,
    /// Update endpoint URL.
    pub url: String,
    /// Station identifier sent as `ID`.
    pub station_id: String,
    /// Station password sent as `PASSWORD`.
    pub password: String,
    /// HTTP status that confirms a delivery.
    #[serde(default = "default_success_status")]
    pub success_status: u16,
}

impl Destination {
    /// Creates a destination without credentials that accepts status 200.
    pub fn new(code: impl Into<String>, bit: u8, url: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            bit,
            url: url.into(),
            station_id: String::new(),
            password: String::new(),
            success_status: default_success_status(),
        }
    }

    /// Sets the station credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        station_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.station_id = station_id.into();
        self.password = password.into();
        self
    }

    /// Sets the status code that confirms a delivery.
    #[must_use]
    pub fn with_success_status(mut self, status: u16) -> Self {
        self.success_status = status;
        self
    }

    /// The acknowledgment bit of this destination as a mask.
    pub fn mask(&self) -> AckMask {
        AckMask::bit(self.bit)
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("code", &self.code)
            .field("bit", &self.bit)
            .field("url", &self.url)
            .field("station_id", &self.station_id)
            .field("password", &"<redacted>")
            .field("success_status", &self.success_status)
            .finish()
    }
}

/// Returns the mask with the bit of every destination set.
pub fn full_mask(destinations: &[Destination]) -> AckMask {
    destinations
        .iter()
        .fold(AckMask::NONE, |mask, d| mask | d.mask())
}

/// Builds the update parameters for `quarter`.
///
/// The observation time is the quarter centre in UTC.
pub fn payload(quarter: &Quarter, destination: &Destination) -> Payload {
    let r = &quarter.reading;
    let date = chrono::DateTime::from_timestamp(quarter_center(quarter.index), 0)
        .map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_default();

    vec![
        ("ID", destination.station_id.clone()),
        ("PASSWORD", destination.password.clone()),
        ("dateutc", date),
        ("winddir", format!("{:.0}", r.wind_direction)),
        ("windspeedmph", r.wind_mph.to_string()),
        ("rainin", format!("{:.2}", r.rain_in)),
        ("dailyrainin", format!("{:.2}", r.rain_day_in)),
        ("humidity", r.humidity_pct.to_string()),
        ("dewptf", format!("{:.1}", r.dewpoint_f)),
        ("UV", r.alert_status.to_string()),
        ("tempf", format!("{:.1}", r.temp_f)),
        ("baromin", format!("{:.3}", r.pressure_inhg)),
        ("action", "updateraw".to_string()),
    ]
}

/// Sends a payload to a destination.
pub trait Transport {
    /// Delivers `payload` and returns the HTTP status the destination
    /// answered with.
    fn send(
        &mut self,
        destination: &Destination,
        payload: &[(&'static str, String)],
    ) -> std::result::Result<u16, PublishError>;
}

/// A [`Transport`] issuing blocking HTTP GET requests with the payload as
/// the query string.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Creates a transport with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::ClientCreate`] if the HTTP client cannot be
    /// built.
    pub fn new(timeout: Duration) -> std::result::Result<Self, PublishError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::ClientCreate { source: e })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(
        &mut self,
        destination: &Destination,
        payload: &[(&'static str, String)],
    ) -> std::result::Result<u16, PublishError> {
        let response = self
            .client
            .get(&destination.url)
            .query(payload)
            .send()
            .map_err(|e| PublishError::Request {
                code: destination.code.clone(),
                source: e,
            })?;
        Ok(response.status().as_u16())
    }
}

/// Outcome of a [`Reconciler::reconcile`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Quarters every destination had acknowledged before the pass.
    pub previously_complete: usize,
    /// Quarters with at least one destination outstanding.
    pub candidates: usize,
    /// Deliveries confirmed during this pass.
    pub delivered: usize,
    /// Deliveries answered with a non-success status.
    pub rejected: usize,
    /// Deliveries that failed in transport.
    pub failed: usize,
    /// Deliveries skipped in dry-run mode.
    pub skipped: usize,
}

/// Reconciles quarter acknowledgment masks against the destinations.
pub struct Reconciler<'a> {
    store: &'a mut dyn SampleStore,
    audit: &'a mut dyn AuditSink,
    transport: &'a mut dyn Transport,
    destinations: &'a [Destination],
    dry_run: bool,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler that delivers through `transport`.
    pub fn new(
        store: &'a mut dyn SampleStore,
        audit: &'a mut dyn AuditSink,
        transport: &'a mut dyn Transport,
        destinations: &'a [Destination],
    ) -> Self {
        Self {
            store,
            audit,
            transport,
            destinations,
            dry_run: false,
        }
    }

    /// In dry-run mode nothing is sent and no mask changes.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sends every unacknowledged quarter to each outstanding destination.
    ///
    /// A confirmed delivery is persisted before the next one is attempted,
    /// so an interrupted pass never resends what was confirmed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if reading quarters or persisting a mask
    /// fails; the abort is audited first. Delivery failures are audited and
    /// counted instead.
    pub fn reconcile(&mut self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let full = full_mask(self.destinations);

        self.audit.record("reporting newly available data");
        report.previously_complete = match self.store.acknowledged_count(full) {
            Ok(count) => count,
            Err(e) => return Err(record_abort(self.audit, "  db read error", e)),
        };
        self.audit.record(&format!(
            "  reported {} quarters previously",
            report.previously_complete
        ));

        let pending = match self.store.unacknowledged_quarters(full) {
            Ok(pending) => pending,
            Err(e) => return Err(record_abort(self.audit, "  db read error", e)),
        };

        for quarter in pending {
            report.candidates += 1;
            let index = quarter.index;
            let mut mask = quarter.ack_mask;

            for destination in self.destinations {
                let code = &destination.code;
                if mask.contains(destination.mask()) {
                    continue;
                }

                if self.dry_run {
                    report.skipped += 1;
                    self.audit
                        .record(&format!("  quarter {index} {code} update skip"));
                    continue;
                }

                let payload = payload(&quarter, destination);
                match self.transport.send(destination, &payload) {
                    Ok(status) if status == destination.success_status => {
                        mask |= destination.mask();
                        if let Err(e) = self.store.set_ack_mask(index, mask) {
                            let context = format!("    quarter {index} {code} db write error");
                            return Err(record_abort(self.audit, &context, e));
                        }
                        report.delivered += 1;
                        self.audit
                            .record(&format!("    quarter {index} {code} update ok"));
                    }
                    Ok(status) => {
                        report.rejected += 1;
                        self.audit
                            .record(&format!("    quarter {index} {code} update bad {status}"));
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(quarter = index, destination = %code, error = %e, "delivery failed");
                        self.audit
                            .record(&format!("    quarter {index} {code} update error: {e}"));
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAudit;
    use crate::sample::Reading;
    use crate::store::MemoryStore;

    /// Answers with a fixed status per destination code and records calls.
    struct Scripted {
        answers: Vec<(&'static str, std::result::Result<u16, &'static str>)>,
        calls: Vec<String>,
    }

    impl Transport for Scripted {
        fn send(
            &mut self,
            destination: &Destination,
            payload: &[(&'static str, String)],
        ) -> std::result::Result<u16, PublishError> {
            assert!(payload.iter().any(|(k, _)| *k == "dateutc"));
            self.calls.push(destination.code.clone());
            let (_, answer) = *self
                .answers
                .iter()
                .find(|(code, _)| *code == destination.code)
                .unwrap();
            answer.map_err(|reason| PublishError::Unreachable {
                code: destination.code.clone(),
                reason: reason.to_string(),
            })
        }
    }

    fn destinations() -> Vec<Destination> {
        vec![
            Destination::new("wu", 0, "http://wu.invalid/update").with_credentials("KXX1", "pw"),
            Destination::new("ps", 1, "http://ps.invalid/update").with_credentials("KXX1", "pw2"),
        ]
    }

    fn quarter_with_data(index: i64, mask: AckMask) -> Quarter {
        Quarter {
            index,
            reading: Reading {
                temp_f: 71.04,
                dewpoint_f: 55.0,
                humidity_pct: 60,
                pressure_inhg: 30.1234,
                wind_mph: 5,
                wind_direction: 181.6,
                rain_in: 0.005,
                rain_day_in: 0.25,
                alert_status: 2,
                ..Reading::default()
            },
            sample_count: 10,
            log_status: crate::sample::LogStatus::Unknown,
            ack_mask: mask,
        }
    }

    #[test]
    fn test_payload_parameters() {
        let quarter = quarter_with_data(1, AckMask::NONE);
        let dest = &destinations()[0];

        let params = payload(&quarter, dest);
        let get = |k: &str| params.iter().find(|(key, _)| *key == k).unwrap().1.clone();

        assert_eq!(get("ID"), "KXX1");
        assert_eq!(get("PASSWORD"), "pw");
        assert_eq!(get("dateutc"), "1970-01-01 00:22:30");
        assert_eq!(get("winddir"), "182");
        assert_eq!(get("windspeedmph"), "5");
        assert_eq!(get("dailyrainin"), "0.25");
        assert_eq!(get("humidity"), "60");
        assert_eq!(get("dewptf"), "55.0");
        assert_eq!(get("UV"), "2");
        assert_eq!(get("tempf"), "71.0");
        assert_eq!(get("baromin"), "30.123");
        assert_eq!(get("action"), "updateraw");
        assert_eq!(params.len(), 13);
    }

    #[test]
    fn test_partial_success_then_retry_only_failed() {
        let mut store = MemoryStore::new();
        store.replace_quarter(&quarter_with_data(5, AckMask::NONE)).unwrap();
        let mut audit = MemoryAudit::new();
        let dests = destinations();

        let mut transport = Scripted {
            answers: vec![("wu", Ok(200)), ("ps", Err("connection refused"))],
            calls: Vec::new(),
        };
        let report = Reconciler::new(&mut store, &mut audit, &mut transport, &dests)
            .reconcile()
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.quarter(5).unwrap().unwrap().ack_mask.bits(), 0x01);
        assert!(audit.contains("quarter 5 wu update ok"));
        assert!(audit.contains("quarter 5 ps update error"));

        let mut transport = Scripted {
            answers: vec![("wu", Ok(200)), ("ps", Ok(200))],
            calls: Vec::new(),
        };
        Reconciler::new(&mut store, &mut audit, &mut transport, &dests)
            .reconcile()
            .unwrap();

        assert_eq!(transport.calls, vec!["ps".to_string()]);
        assert_eq!(store.quarter(5).unwrap().unwrap().ack_mask.bits(), 0x03);
    }

    #[test]
    fn test_bad_status_leaves_bit_clear() {
        let mut store = MemoryStore::new();
        store.replace_quarter(&quarter_with_data(5, AckMask::bit(0))).unwrap();
        let mut audit = MemoryAudit::new();
        let dests = destinations();
        let mut transport = Scripted {
            answers: vec![("ps", Ok(500))],
            calls: Vec::new(),
        };

        let report = Reconciler::new(&mut store, &mut audit, &mut transport, &dests)
            .reconcile()
            .unwrap();

        assert_eq!(report.rejected, 1);
        assert_eq!(store.quarter(5).unwrap().unwrap().ack_mask, AckMask::bit(0));
        assert!(audit.contains("quarter 5 ps update bad 500"));
    }

    #[test]
    fn test_complete_and_empty_quarters_not_sent() {
        let mut store = MemoryStore::new();
        store
            .replace_quarter(&quarter_with_data(1, AckMask::from_bits(0x03)))
            .unwrap();
        store.replace_quarter(&Quarter::empty(2)).unwrap();
        let mut audit = MemoryAudit::new();
        let dests = destinations();
        let mut transport = Scripted {
            answers: Vec::new(),
            calls: Vec::new(),
        };

        let report = Reconciler::new(&mut store, &mut audit, &mut transport, &dests)
            .reconcile()
            .unwrap();

        assert_eq!(report.previously_complete, 1);
        assert_eq!(report.candidates, 0);
        assert!(transport.calls.is_empty());
        assert!(audit.contains("reported 1 quarters previously"));
    }

    #[test]
    fn test_dry_run_sends_nothing() {
        let mut store = MemoryStore::new();
        store.replace_quarter(&quarter_with_data(3, AckMask::NONE)).unwrap();
        let mut audit = MemoryAudit::new();
        let dests = destinations();
        let mut transport = Scripted {
            answers: Vec::new(),
            calls: Vec::new(),
        };

        let report = Reconciler::new(&mut store, &mut audit, &mut transport, &dests)
            .with_dry_run(true)
            .reconcile()
            .unwrap();

        assert_eq!(report.skipped, 2);
        assert!(transport.calls.is_empty());
        assert_eq!(store.quarter(3).unwrap().unwrap().ack_mask, AckMask::NONE);
        assert!(audit.contains("quarter 3 wu update skip"));
    }

    #[test]
    fn test_custom_success_status() {
        let mut store = MemoryStore::new();
        store.replace_quarter(&quarter_with_data(3, AckMask::NONE)).unwrap();
        let mut audit = MemoryAudit::new();
        let dests = vec![Destination::new("x", 2, "http://x.invalid").with_success_status(204)];
        let mut transport = Scripted {
            answers: vec![("x", Ok(204))],
            calls: Vec::new(),
        };

        Reconciler::new(&mut store, &mut audit, &mut transport, &dests)
            .reconcile()
            .unwrap();

        assert_eq!(store.quarter(3).unwrap().unwrap().ack_mask, AckMask::bit(2));
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", destinations()[0]);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("\"pw\""));
    }

    #[test]
    fn test_destination_defaults_from_json() {
        let dest: Destination = serde_json::from_str(
            r#"{"code":"wu","bit":0,"url":"http://x","station_id":"S","password":"P"}"#,
        )
        .unwrap();
        assert_eq!(dest.success_status, 200);
        assert_eq!(full_mask(&[dest]), AckMask::bit(0));
    }
}
