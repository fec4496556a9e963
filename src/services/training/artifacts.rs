use crate::algorithms::{BagOfWords, Dictionary, LdaModel};
use crate::error::{RecommenderError, Result};
use crate::models::{ItemId, ItemType};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bag-of-words corpus with the item each row belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusIndex {
    pub item_ids: Vec<ItemId>,
    pub bows: Vec<BagOfWords>,
}

impl CorpusIndex {
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub item_type: ItemType,
    pub model: LdaModel,
    pub dictionary: Dictionary,
    pub corpus: CorpusIndex,
}

/// One model/dictionary/corpus file set per item type, replaced on every
/// committed run.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self, item_type: ItemType) -> PathBuf {
        self.dir.join(format!("model_{}.json", item_type))
    }

    pub fn dictionary_path(&self, item_type: ItemType) -> PathBuf {
        self.dir.join(format!("dict_{}.json", item_type))
    }

    pub fn corpus_path(&self, item_type: ItemType) -> PathBuf {
        self.dir.join(format!("corpus_{}.json", item_type))
    }

    fn paths(&self, item_type: ItemType) -> [PathBuf; 3] {
        [
            self.model_path(item_type),
            self.dictionary_path(item_type),
            self.corpus_path(item_type),
        ]
    }

    pub async fn save(&self, trained: &TrainedModel) -> Result<()> {
        self.stage(trained).await?;
        self.promote(trained.item_type).await
    }

    /// Writes the file set under staging names. `load` keeps returning the
    /// previous set until `promote` runs.
    pub async fn stage(&self, trained: &TrainedModel) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let [model, dictionary, corpus] = self.paths(trained.item_type);
        write_json(&staged(&model), &trained.model).await?;
        write_json(&staged(&dictionary), &trained.dictionary).await?;
        write_json(&staged(&corpus), &trained.corpus).await?;

        debug!(
            item_type = %trained.item_type,
            dir = %self.dir.display(),
            "Staged model artifacts"
        );
        Ok(())
    }

    pub async fn promote(&self, item_type: ItemType) -> Result<()> {
        for path in self.paths(item_type) {
            tokio::fs::rename(staged(&path), &path).await?;
        }
        info!(item_type = %item_type, dir = %self.dir.display(), "Saved model artifacts");
        Ok(())
    }

    pub async fn discard(&self, item_type: ItemType) -> Result<()> {
        for path in self.paths(item_type) {
            let staged = staged(&path);
            if tokio::fs::try_exists(&staged).await? {
                tokio::fs::remove_file(&staged).await?;
            }
        }
        warn!(item_type = %item_type, "Discarded staged model artifacts");
        Ok(())
    }

    /// `None` when any file of the set is missing.
    pub async fn load(&self, item_type: ItemType) -> Result<Option<TrainedModel>> {
        let paths = self.paths(item_type);
        for path in &paths {
            if !tokio::fs::try_exists(path).await? {
                debug!(path = %path.display(), "Model artifact missing");
                return Ok(None);
            }
        }

        let model: LdaModel = read_json(&paths[0]).await?;
        let dictionary: Dictionary = read_json(&paths[1]).await?;
        let corpus: CorpusIndex = read_json(&paths[2]).await?;

        if corpus.item_ids.len() != corpus.bows.len() {
            return Err(RecommenderError::Artifact(format!(
                "corpus for {} has {} ids but {} documents",
                item_type,
                corpus.item_ids.len(),
                corpus.bows.len()
            )));
        }

        Ok(Some(TrainedModel {
            item_type,
            model,
            dictionary,
            corpus,
        }))
    }
}

fn staged(path: &Path) -> PathBuf {
    path.with_extension("json.staged")
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RecommenderError::Artifact(format!("{}: {}", path.display(), e)))
}
