//! Downlink persistence.

use thingrelay_core::Result;
use thingrelay_storage::{Collection, SharedBackend};

use crate::model::Downlink;

const DOWNLINKS_TABLE: &str = "downlinks";

#[derive(Clone)]
pub struct DownlinkRepository {
    downlinks: Collection<Downlink>,
}

impl DownlinkRepository {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            downlinks: Collection::new(backend, DOWNLINKS_TABLE),
        }
    }

    pub fn save(&self, downlinks: &[Downlink]) -> Result<()> {
        Ok(self
            .downlinks
            .put_batch(downlinks.iter().map(|d| (d.id.clone(), d)))?)
    }

    pub fn retrieve(&self, id: &str) -> Result<Downlink> {
        Ok(self.downlinks.require(id)?)
    }

    pub fn retrieve_all(&self) -> Result<Vec<Downlink>> {
        Ok(self.downlinks.all()?)
    }

    pub fn retrieve_by_thing(&self, thing_id: &str) -> Result<Vec<Downlink>> {
        Ok(self
            .retrieve_all()?
            .into_iter()
            .filter(|d| d.thing_id == thing_id)
            .collect())
    }

    pub fn retrieve_by_group(&self, group_id: &str) -> Result<Vec<Downlink>> {
        Ok(self
            .retrieve_all()?
            .into_iter()
            .filter(|d| d.group_id == group_id)
            .collect())
    }

    pub fn remove(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.downlinks.remove(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use thingrelay_core::Error;
    use thingrelay_storage::MemoryBackend;

    fn downlink(id: &str, thing: &str, group: &str) -> Downlink {
        Downlink {
            id: id.into(),
            thing_id: thing.into(),
            group_id: group.into(),
            url: "http://h/".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_queries() {
        let repo = DownlinkRepository::new(Arc::new(MemoryBackend::new()));
        repo.save(&[
            downlink("a", "t1", "g1"),
            downlink("b", "t2", "g1"),
            downlink("c", "t3", "g2"),
        ])
        .unwrap();

        assert_eq!(repo.retrieve_by_thing("t1").unwrap().len(), 1);
        assert_eq!(repo.retrieve_by_group("g1").unwrap().len(), 2);
        assert_eq!(repo.retrieve("c").unwrap().thing_id, "t3");

        repo.remove(&["a".to_string(), "missing".to_string()]).unwrap();
        assert!(matches!(repo.retrieve("a"), Err(Error::NotFound(_))));
        assert_eq!(repo.retrieve_all().unwrap().len(), 2);
    }
}
