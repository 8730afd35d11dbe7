//! Downlink management.
//!
//! Thing-scoped calls need access to the thing, group listings need access
//! to the group and backup/restore need the root subject. Every mutation is
//! mirrored onto the scheduler.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use thingrelay_core::things::ROOT_SUBJECT;
use thingrelay_core::{Result, SharedThings};

use crate::model::Downlink;
use crate::repository::DownlinkRepository;
use crate::scheduler::DownlinkScheduler;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownlinksBackup {
    pub downlinks: Vec<Downlink>,
}

pub struct DownlinkService {
    things: SharedThings,
    repo: DownlinkRepository,
    scheduler: Arc<DownlinkScheduler>,
}

impl DownlinkService {
    pub fn new(things: SharedThings, repo: DownlinkRepository, scheduler: Arc<DownlinkScheduler>) -> Self {
        Self {
            things,
            repo,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &Arc<DownlinkScheduler> {
        &self.scheduler
    }

    /// Validate, store and schedule downlinks for a thing.
    pub async fn create_downlinks(
        &self,
        token: &str,
        thing_id: &str,
        downlinks: Vec<Downlink>,
    ) -> Result<Vec<Downlink>> {
        self.things.can_user_access_thing(token, thing_id).await?;
        let group_id = self.things.get_group_id_by_thing(thing_id).await?;

        let mut created = Vec::with_capacity(downlinks.len());
        for mut downlink in downlinks {
            downlink.validate()?;
            downlink.id = uuid::Uuid::new_v4().to_string();
            downlink.thing_id = thing_id.to_string();
            downlink.group_id = group_id.clone();
            created.push(downlink);
        }

        self.repo.save(&created)?;
        for downlink in &created {
            self.schedule(downlink.clone());
        }
        info!(thing_id, count = created.len(), "Downlinks created");
        Ok(created)
    }

    pub async fn list_downlinks_by_thing(&self, token: &str, thing_id: &str) -> Result<Vec<Downlink>> {
        self.things.can_user_access_thing(token, thing_id).await?;
        self.repo.retrieve_by_thing(thing_id)
    }

    pub async fn list_downlinks_by_group(&self, token: &str, group_id: &str) -> Result<Vec<Downlink>> {
        self.things.can_user_access_group(token, group_id).await?;
        self.repo.retrieve_by_group(group_id)
    }

    pub async fn view_downlink(&self, token: &str, id: &str) -> Result<Downlink> {
        let downlink = self.repo.retrieve(id)?;
        self.things.can_user_access_thing(token, &downlink.thing_id).await?;
        Ok(downlink)
    }

    /// Replace a downlink's definition and reschedule it. Ownership is kept.
    pub async fn update_downlink(&self, token: &str, mut downlink: Downlink) -> Result<Downlink> {
        let current = self.view_downlink(token, &downlink.id).await?;
        downlink.validate()?;
        downlink.thing_id = current.thing_id;
        downlink.group_id = current.group_id;

        self.repo.save(std::slice::from_ref(&downlink))?;
        self.schedule(downlink.clone());
        Ok(downlink)
    }

    pub async fn remove_downlinks(&self, token: &str, ids: &[String]) -> Result<()> {
        for id in ids {
            self.view_downlink(token, id).await?;
        }
        self.repo.remove(ids)?;
        for id in ids {
            self.scheduler.unschedule(id);
        }
        Ok(())
    }

    /// Schedule every stored downlink. Returns how many were scheduled;
    /// past one-time downlinks and broken schedules are skipped.
    pub async fn load_and_schedule_tasks(&self) -> Result<usize> {
        let downlinks = self.repo.retrieve_all()?;
        let total = downlinks.len();
        let scheduled = downlinks
            .into_iter()
            .filter(|d| self.schedule(d.clone()))
            .count();
        info!(total, scheduled, "Downlink tasks loaded");
        Ok(scheduled)
    }

    pub async fn backup(&self, token: &str) -> Result<DownlinksBackup> {
        self.things.authorize(token, ROOT_SUBJECT).await?;
        Ok(DownlinksBackup {
            downlinks: self.repo.retrieve_all()?,
        })
    }

    /// Store the backed-up downlinks and schedule them.
    pub async fn restore(&self, token: &str, backup: DownlinksBackup) -> Result<()> {
        self.things.authorize(token, ROOT_SUBJECT).await?;
        self.repo.save(&backup.downlinks)?;
        for downlink in &backup.downlinks {
            self.schedule(downlink.clone());
        }
        info!(downlinks = backup.downlinks.len(), "Downlinks restored");
        Ok(())
    }

    fn schedule(&self, downlink: Downlink) -> bool {
        let id = downlink.id.clone();
        match self.scheduler.schedule(downlink) {
            Ok(scheduled) => scheduled,
            Err(e) => {
                warn!(downlink_id = %id, error = %e, "Failed to schedule downlink");
                false
            }
        }
    }
}
