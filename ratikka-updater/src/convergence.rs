//! Alert convergence: reconcile a feed snapshot with the graph.
//!
//! Each cycle builds the candidate association set from the snapshot,
//! diffs it against the set applied by the previous cycle, and edits only
//! the edges whose alerts actually change. Removals are computed from the
//! whole previous set, so an alert can never outlive its feature.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info};
use ratikka_core::geometry::{buffered_envelope, meters_to_degrees, within_distance};
use ratikka_core::{
    Alert, AlertSource, EdgeId, Graph, GraphError, GraphWriter, Validity, WriterTask,
};

use crate::feed::value_text;
use crate::{Feature, PollingUpdaterConfig};

/// Identity of one applied association: an edge and the alert's source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssociationKey {
    /// Edge carrying the alert.
    pub edge: EdgeId,
    /// Source tag of the alert.
    pub source: AlertSource,
}

impl AssociationKey {
    /// Construct a key.
    pub const fn new(edge: EdgeId, source: AlertSource) -> Self {
        Self { edge, source }
    }
}

/// The `(edge, alert)` pairs a feed currently has applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssociationSet {
    entries: BTreeMap<AssociationKey, Alert>,
}

impl AssociationSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `alert` on `edge`, replacing any alert with the same source.
    pub fn insert(&mut self, edge: EdgeId, alert: Alert) {
        self.entries
            .insert(AssociationKey::new(edge, alert.source.clone()), alert);
    }

    /// Alert applied for `key`, if any.
    pub fn get(&self, key: &AssociationKey) -> Option<&Alert> {
        self.entries.get(key)
    }

    /// Whether the set has an association for `key`.
    pub fn contains(&self, key: &AssociationKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of associations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Associations in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&AssociationKey, &Alert)> {
        self.entries.iter()
    }

    /// Distinct edges touched by the set.
    pub fn edges(&self) -> BTreeSet<EdgeId> {
        self.entries.keys().map(|key| key.edge).collect()
    }
}

/// Edits made by one [`AlertConvergence::apply`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvergenceReport {
    /// Associations dropped because their feature vanished or expired.
    pub removed: usize,
    /// New associations.
    pub added: usize,
    /// Associations whose alert content changed.
    pub changed: usize,
    /// Edge alert-set replacements performed.
    pub replacements: usize,
}

impl ConvergenceReport {
    /// Whether the graph was left untouched.
    pub const fn is_unchanged(&self) -> bool {
        self.replacements == 0
    }
}

/// Convergence parameters for one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertConvergence {
    feed_id: String,
    header_attribute: String,
    search_radius_m: f64,
}

impl AlertConvergence {
    /// Convergence for `feed_id`, reading the alert header from
    /// `header_attribute` and matching edges within `search_radius_m`.
    pub fn new(
        feed_id: impl Into<String>,
        header_attribute: impl Into<String>,
        search_radius_m: f64,
    ) -> Self {
        Self {
            feed_id: feed_id.into(),
            header_attribute: header_attribute.into(),
            search_radius_m,
        }
    }

    /// Convergence parameters taken from an updater configuration.
    pub fn from_config(config: &PollingUpdaterConfig) -> Self {
        Self::new(
            config.feed_id.clone(),
            config.mapping.header.clone(),
            config.search_radius_m,
        )
    }

    /// Feed identifier stamped on every alert.
    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    /// Build the alert a feature would produce.
    ///
    /// The description lists the feature's attributes as sorted
    /// `key=value` lines.
    pub fn candidate_alert(&self, feature: &Feature) -> Alert {
        let header = feature
            .attribute_text(&self.header_attribute)
            .unwrap_or_default();
        let description = feature
            .attributes
            .iter()
            .filter_map(|(name, value)| value_text(value).map(|text| format!("{name}={text}")))
            .collect::<Vec<_>>()
            .join("\n");
        Alert::new(
            AlertSource::new(self.feed_id.clone(), feature.external_id.clone()),
            header,
            description,
            Validity::new(feature.valid_from, feature.valid_until),
            feature.geometry.clone(),
        )
    }

    /// Associations the snapshot calls for at `now`.
    ///
    /// Features not valid at `now` contribute nothing. Each remaining
    /// feature is matched against every edge lying within the search radius
    /// of its geometry.
    pub fn candidate_set(
        &self,
        graph: &Graph,
        features: &[Feature],
        now: DateTime<Utc>,
    ) -> AssociationSet {
        let radius = meters_to_degrees(self.search_radius_m);
        let mut candidate = AssociationSet::new();
        for feature in features {
            let alert = self.candidate_alert(feature);
            if !alert.is_active_at(now) {
                debug!("feature {} is not valid at {now}", feature.external_id);
                continue;
            }
            let Some(envelope) = buffered_envelope(&alert.geometry, radius) else {
                debug!("feature {} has empty geometry", feature.external_id);
                continue;
            };
            for edge in graph.edges_intersecting(&envelope) {
                if within_distance(&alert.geometry, edge.geometry(), radius) {
                    candidate.insert(edge.id(), alert.clone());
                }
            }
        }
        candidate
    }

    /// Move the graph from `previous` to `candidate`.
    ///
    /// Every edge is edited at most once per phase: first removals, then
    /// additions and content changes. Nothing is written when the two sets
    /// are equal.
    ///
    /// # Errors
    /// Fails when an association names an edge the graph does not have.
    pub fn apply(
        writer: &mut GraphWriter<'_>,
        previous: &AssociationSet,
        candidate: &AssociationSet,
    ) -> Result<ConvergenceReport, GraphError> {
        let start = writer.replacements();
        let mut report = ConvergenceReport::default();

        let mut removals: BTreeMap<EdgeId, BTreeSet<&AlertSource>> = BTreeMap::new();
        for (key, _) in previous.iter().filter(|(key, _)| !candidate.contains(key)) {
            removals.entry(key.edge).or_default().insert(&key.source);
            report.removed += 1;
        }
        for (edge, sources) in removals {
            writer.update_alerts(edge, |current| {
                current
                    .iter()
                    .filter(|alert| !sources.contains(&alert.source))
                    .cloned()
                    .collect()
            })?;
        }

        let mut additions: BTreeMap<EdgeId, Vec<&Alert>> = BTreeMap::new();
        for (key, alert) in candidate.iter() {
            match previous.get(key) {
                Some(applied) if applied == alert => continue,
                Some(_) => report.changed += 1,
                None => report.added += 1,
            }
            additions.entry(key.edge).or_default().push(alert);
        }
        for (edge, alerts) in additions {
            writer.update_alerts(edge, |current| {
                current
                    .iter()
                    .filter(|existing| !alerts.iter().any(|alert| alert.source == existing.source))
                    .cloned()
                    .chain(alerts.iter().map(|alert| (*alert).clone()))
                    .collect()
            })?;
        }

        report.replacements = writer.replacements() - start;
        Ok(report)
    }

    /// Package one cycle as a writer task.
    ///
    /// The task computes the candidate set against the live graph, applies
    /// the diff from the set stored in `applied`, and stores the candidate
    /// only when every edit succeeded.
    pub fn into_task(
        self,
        features: Vec<Feature>,
        now: DateTime<Utc>,
        applied: Arc<Mutex<AssociationSet>>,
    ) -> WriterTask {
        let name = format!("converge-{}", self.feed_id);
        WriterTask::new(name, move |writer| {
            let candidate = self.candidate_set(writer.graph(), &features, now);
            let mut stored = applied.lock().unwrap_or_else(PoisonError::into_inner);
            let report = Self::apply(writer, &stored, &candidate)?;
            if report.is_unchanged() {
                debug!("feed {} converged without edits", self.feed_id);
            } else {
                info!(
                    "feed {}: {} added, {} changed, {} removed across {} edge edits",
                    self.feed_id, report.added, report.changed, report.removed, report.replacements
                );
            }
            *stored = candidate;
            Ok(())
        })
    }
}
