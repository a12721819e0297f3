//! The mutation engine.
//!
//! Every mutation follows read → merge → compare-and-set → notify. The
//! compare-and-set makes each mutation linearizable against other
//! administrators; a lost race surfaces as a version-conflict error and is
//! never retried here. Config writes additionally publish a sequential
//! change notice that wakes the controller; the notice may land after the
//! config document becomes visible, which the controller tolerates.
//!
//! A mutation cancelled between the compare-and-set and the notice leaves
//! the config applied but the controller untriggered until the next
//! mutation on the same entity; callers needing stricter behavior retry.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::{AdminClient, Error, Result};
use crate::types::{ConfigEntity, ConfigEntry, PartitionAssignment, TopicCreation};
use crate::zk::{znode, CreateMode, Error as ZkError};

impl AdminClient {
    /// Apply config entries to a topic, returning the keys actually changed
    /// in entry order.
    ///
    /// An entry with an empty value deletes the key. With `overwrite` unset,
    /// keys that already exist (with any differing value, and including
    /// deletions) are silently skipped; only brand-new keys are written.
    pub async fn update_topic_config(
        &self,
        name: &str,
        entries: &[ConfigEntry],
        overwrite: bool,
    ) -> Result<Vec<String>> {
        self.update_entity_config(
            ConfigEntity::Topic(name.to_string()),
            &znode::topic_config(name),
            znode::CONFIG_TOPICS,
            entries,
            overwrite,
        )
        .await
    }

    /// Apply config entries to a broker. Same semantics as
    /// [`AdminClient::update_topic_config`].
    pub async fn update_broker_config(
        &self,
        id: i32,
        entries: &[ConfigEntry],
        overwrite: bool,
    ) -> Result<Vec<String>> {
        self.update_entity_config(
            ConfigEntity::Broker(id),
            &znode::broker_config(id),
            znode::CONFIG_BROKERS,
            entries,
            overwrite,
        )
        .await
    }

    async fn update_entity_config(
        &self,
        entity: ConfigEntity,
        path: &str,
        parent: &str,
        entries: &[ConfigEntry],
        overwrite: bool,
    ) -> Result<Vec<String>> {
        self.ensure_writable()?;

        // The document keeps whatever version field it was read with; only
        // documents we create from scratch get the current version.
        let (mut document, node_version) = match self.zk.get_json::<znode::EntityConfig>(path).await
        {
            Ok((document, version)) => (document, Some(version)),
            Err(ZkError::NotFound { .. }) => (znode::EntityConfig::new(), None),
            Err(err) => return Err(err.into()),
        };

        let changed = merge_config_entries(&mut document.config, entries, overwrite);
        if changed.is_empty() {
            debug!(entity = %entity.entity_path(), "config update changed nothing");
            return Ok(changed);
        }

        match node_version {
            Some(version) => self.zk.set_json(path, &document, version).await?,
            None => {
                self.zk.ensure_path(parent).await?;
                self.zk
                    .create_json(path, &document, CreateMode::Persistent)
                    .await?;
            }
        }
        self.notify_config_change(&entity).await?;
        info!(
            entity = %entity.entity_path(),
            changed = changed.len(),
            "config updated"
        );
        Ok(changed)
    }

    async fn notify_config_change(&self, entity: &ConfigEntity) -> Result<()> {
        self.zk.ensure_path(znode::CONFIG_CHANGES).await?;
        let notice = znode::ChangeNotice::for_entity(entity);
        let created = self
            .zk
            .create_json(
                znode::CHANGE_NOTICE_PREFIX,
                &notice,
                CreateMode::PersistentSequential,
            )
            .await?;
        debug!(notice = created.as_str(), "change notice published");
        Ok(())
    }

    /// Create a topic via the brokers.
    ///
    /// Propagation is eventually consistent: the topic may not be visible
    /// to reads (broker- or coordination-side) immediately after success.
    pub async fn create_topic(&self, creation: &TopicCreation) -> Result<()> {
        self.ensure_writable()?;
        if creation.name.is_empty() {
            return Err(Error::InvalidArgument(
                "topic name must not be empty".to_string(),
            ));
        }
        Ok(self.brokers.create_topic(creation).await?)
    }

    /// Whether a partition reassignment is currently running.
    pub async fn assignment_in_progress(&self) -> Result<bool> {
        Ok(self.zk.exists(znode::REASSIGN_PARTITIONS).await?)
    }

    /// Whether a preferred-leader election is currently running.
    pub async fn election_in_progress(&self) -> Result<bool> {
        Ok(self.zk.exists(znode::PREFERRED_REPLICA_ELECTION).await?)
    }

    /// Start moving the given partitions of `topic` onto new replica sets.
    ///
    /// Only one reassignment can run cluster-wide; the control document
    /// stays until the controller finishes and deletes it. Broker liveness
    /// is not checked here — a reassignment onto a dead broker simply
    /// stalls until the controller can complete it.
    pub async fn assign_partitions(
        &self,
        topic: &str,
        assignments: &[PartitionAssignment],
    ) -> Result<()> {
        self.ensure_writable()?;
        if assignments.is_empty() {
            return Err(Error::InvalidArgument(
                "no partition assignments given".to_string(),
            ));
        }
        for assignment in assignments {
            if assignment.replicas.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "partition {} has no replicas",
                    assignment.id
                )));
            }
        }
        if self.assignment_in_progress().await? {
            return Err(Error::AlreadyRunning {
                path: znode::REASSIGN_PARTITIONS.to_string(),
            });
        }

        let document = znode::Reassignment {
            version: znode::DOCUMENT_VERSION,
            partitions: assignments
                .iter()
                .map(|assignment| znode::ReassignmentPartition {
                    topic: topic.to_string(),
                    partition: assignment.id,
                    replicas: assignment.replicas.clone(),
                })
                .collect(),
        };
        self.zk.ensure_path(znode::ADMIN).await?;
        match self
            .zk
            .create_json(znode::REASSIGN_PARTITIONS, &document, CreateMode::Persistent)
            .await
        {
            Ok(_) => {
                info!(topic, partitions = assignments.len(), "reassignment started");
                Ok(())
            }
            // Lost the race against another administrator.
            Err(ZkError::NodeExists { path }) => Err(Error::AlreadyRunning { path }),
            Err(err) => Err(err.into()),
        }
    }

    /// Extend `topic` with new partitions.
    ///
    /// The new IDs must continue the existing dense numbering exactly and
    /// every new replica set must match the topic's existing width.
    pub async fn add_partitions(
        &self,
        topic: &str,
        new_assignments: &[PartitionAssignment],
    ) -> Result<()> {
        self.ensure_writable()?;
        if new_assignments.is_empty() {
            return Err(Error::InvalidArgument(
                "no partition assignments given".to_string(),
            ));
        }

        let path = znode::topic(topic);
        let (mut document, node_version) = self
            .zk
            .get_json::<znode::TopicAssignment>(&path)
            .await?;
        let existing = document
            .sorted_partitions()
            .map_err(Error::InvalidResponse)?;

        for assignment in new_assignments {
            if document
                .partitions
                .contains_key(&assignment.id.to_string())
            {
                return Err(Error::PartitionExists {
                    topic: topic.to_string(),
                    partition: assignment.id,
                });
            }
        }

        let next = existing.len() as i32;
        let mut new_ids: Vec<i32> = new_assignments.iter().map(|a| a.id).collect();
        new_ids.sort_unstable();
        for (offset, id) in new_ids.iter().enumerate() {
            if *id != next + offset as i32 {
                return Err(Error::InvalidArgument(format!(
                    "new partition ids must be contiguous from {next}, got {id}"
                )));
            }
        }

        let width = existing.first().map(|(_, replicas)| replicas.len());
        for assignment in new_assignments {
            if assignment.replicas.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "partition {} has no replicas",
                    assignment.id
                )));
            }
            if let Some(width) = width {
                if assignment.replicas.len() != width {
                    return Err(Error::ReplicaWidthMismatch {
                        topic: topic.to_string(),
                        expected: width,
                        actual: assignment.replicas.len(),
                    });
                }
            }
        }

        for assignment in new_assignments {
            document
                .partitions
                .insert(assignment.id.to_string(), assignment.replicas.clone());
        }
        self.zk.set_json(&path, &document, node_version).await?;
        info!(
            topic,
            added = new_assignments.len(),
            total = document.partitions.len(),
            "partitions added"
        );
        Ok(())
    }

    /// Ask the controller to restore the preferred leader for the given
    /// partitions of `topic`.
    ///
    /// Partition IDs are written in the given order; duplicates are kept
    /// (the controller deduplicates).
    pub async fn run_leader_election(&self, topic: &str, partitions: &[i32]) -> Result<()> {
        self.ensure_writable()?;
        if partitions.is_empty() {
            return Err(Error::InvalidArgument("no partitions given".to_string()));
        }
        if self.election_in_progress().await? {
            return Err(Error::AlreadyRunning {
                path: znode::PREFERRED_REPLICA_ELECTION.to_string(),
            });
        }

        let document = znode::Election {
            version: znode::DOCUMENT_VERSION,
            partitions: partitions
                .iter()
                .map(|partition| znode::ElectionPartition {
                    topic: topic.to_string(),
                    partition: *partition,
                })
                .collect(),
        };
        self.zk.ensure_path(znode::ADMIN).await?;
        match self
            .zk
            .create_json(
                znode::PREFERRED_REPLICA_ELECTION,
                &document,
                CreateMode::Persistent,
            )
            .await
        {
            Ok(_) => {
                info!(topic, partitions = partitions.len(), "leader election started");
                Ok(())
            }
            Err(ZkError::NodeExists { path }) => Err(Error::AlreadyRunning { path }),
            Err(err) => Err(err.into()),
        }
    }
}

/// Merge config entries into `config`, returning changed keys in entry
/// order.
///
/// A key changes on insertion, on a differing value when `overwrite` is
/// set, or on deletion (empty value) of an existing key when `overwrite` is
/// set. Entries whose value already matches change nothing.
fn merge_config_entries(
    config: &mut BTreeMap<String, String>,
    entries: &[ConfigEntry],
    overwrite: bool,
) -> Vec<String> {
    let mut changed = Vec::new();
    for entry in entries {
        if entry.value.is_empty() {
            if overwrite && config.remove(&entry.name).is_some() {
                changed.push(entry.name.clone());
            }
            continue;
        }
        match config.get(&entry.name) {
            None => {
                config.insert(entry.name.clone(), entry.value.clone());
                changed.push(entry.name.clone());
            }
            Some(existing) if *existing == entry.value => {}
            Some(_) if overwrite => {
                config.insert(entry.name.clone(), entry.value.clone());
                changed.push(entry.name.clone());
            }
            Some(_) => {}
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn overwrite_updates_inserts_and_deletes() {
        let mut state = config(&[("key1", "value1"), ("key2", "value2"), ("key4", "value4")]);
        let changed = merge_config_entries(
            &mut state,
            &[
                ConfigEntry::set("key2", "value2-updated"),
                ConfigEntry::set("key3", "value3"),
                ConfigEntry::delete("key4"),
            ],
            true,
        );
        assert_eq!(changed, vec!["key2", "key3", "key4"]);
        assert_eq!(
            state,
            config(&[
                ("key1", "value1"),
                ("key2", "value2-updated"),
                ("key3", "value3"),
            ]),
        );
    }

    #[test]
    fn non_overwrite_only_inserts_new_keys() {
        let mut state = config(&[("key2", "value2-updated"), ("key3", "value3")]);
        let changed = merge_config_entries(
            &mut state,
            &[
                ConfigEntry::set("key2", "value2-updated2"),
                ConfigEntry::set("key3", "value3-updated"),
                ConfigEntry::delete("key3"),
                ConfigEntry::set("key5", "new-value"),
            ],
            false,
        );
        assert_eq!(changed, vec!["key5"]);
        assert_eq!(
            state,
            config(&[
                ("key2", "value2-updated"),
                ("key3", "value3"),
                ("key5", "new-value"),
            ]),
        );
    }

    #[test]
    fn equal_values_change_nothing() {
        let mut state = config(&[("key1", "value1")]);
        let changed = merge_config_entries(&mut state, &[ConfigEntry::set("key1", "value1")], true);
        assert!(changed.is_empty());
        assert_eq!(state, config(&[("key1", "value1")]));
    }

    #[test]
    fn deleting_missing_key_changes_nothing() {
        let mut state = config(&[]);
        let changed = merge_config_entries(&mut state, &[ConfigEntry::delete("ghost")], true);
        assert!(changed.is_empty());
    }

    fn entry_strategy() -> impl Strategy<Value = ConfigEntry> {
        ("[a-d]", "[xy]{0,2}").prop_map(|(name, value)| ConfigEntry { name, value })
    }

    proptest! {
        /// With overwrite, merging is exactly "last entry per key wins,
        /// empty deletes".
        #[test]
        fn overwrite_merge_applies_every_entry(
            initial in proptest::collection::btree_map("[a-d]", "[xy]{1,2}", 0..4),
            entries in proptest::collection::vec(entry_strategy(), 0..6),
        ) {
            let mut merged = initial.clone();
            merge_config_entries(&mut merged, &entries, true);

            let mut expected = initial;
            for entry in &entries {
                if entry.value.is_empty() {
                    expected.remove(&entry.name);
                } else {
                    expected.insert(entry.name.clone(), entry.value.clone());
                }
            }
            prop_assert_eq!(merged, expected);
        }

        /// Without overwrite, existing keys are never rewritten and every
        /// changed key is brand new.
        #[test]
        fn non_overwrite_never_touches_existing(
            initial in proptest::collection::btree_map("[a-d]", "[xy]{1,2}", 0..4),
            entries in proptest::collection::vec(entry_strategy(), 0..6),
        ) {
            let mut merged = initial.clone();
            let changed = merge_config_entries(&mut merged, &entries, false);

            for (key, value) in &initial {
                prop_assert_eq!(merged.get(key), Some(value));
            }
            for key in &changed {
                prop_assert!(!initial.contains_key(key));
            }
        }
    }
}
