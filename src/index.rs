//! Vector index storage: build/load/query for the persisted flat L2 index
//! and its JSON sidecar identifier map.
//!
//! Per `(repo, index_name)` the artifact pair is a binary index file
//! (LZ4-framed bincode of the vector matrix) and a `_mapping.json` sidecar
//! `{id_map: {pos → chunkId}, meta_map: {pos → {collection_src,
//! metadata_version}}}`. Both files are written to temp paths and renamed
//! so a crash never leaves a partial artifact.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backends::EmbeddingBackend;
use crate::error::ForagerError;
use crate::l2_distance_sq;
use crate::sanitize_repo;
use crate::store::models::{ChunkDoc, MetadataDoc};
use crate::store::{CHUNKS, Filter, METADATA, Store};

// ─── LZ4 compression helpers ────────────────────────────────────────

/// Magic bytes identifying LZ4-compressed index artifacts.
pub const LZ4_MAGIC: &[u8; 4] = b"LZ4V";

/// Save a serializable value with LZ4 frame compression, atomically:
/// the bytes land in a sibling temp file first and are renamed into place.
pub fn save_compressed<T: Serialize>(
    path: &Path,
    data: &T,
    label: &str,
) -> Result<(), ForagerError> {
    let start = Instant::now();
    let tmp = path.with_extension("tmp");

    {
        let file = std::fs::File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(LZ4_MAGIC)?;
        let mut encoder = lz4_flex::frame::FrameEncoder::new(writer);
        bincode::serialize_into(&mut encoder, data)?;
        let mut writer = encoder
            .finish()
            .map_err(|e| std::io::Error::other(e))?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;

    let size = std::fs::metadata(path)?.len();
    eprintln!(
        "[{}] Saved {:.1} KB in {:.2}s to {}",
        label,
        size as f64 / 1024.0,
        start.elapsed().as_secs_f64(),
        path.display()
    );
    Ok(())
}

/// Load a value previously written by [`save_compressed`].
pub fn load_compressed<T: serde::de::DeserializeOwned>(
    path: &Path,
    label: &str,
) -> Result<T, ForagerError> {
    let path_str = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|e| ForagerError::IndexLoad {
        path: path_str.clone(),
        message: format!("cannot open file: {}", e),
    })?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(|e| ForagerError::IndexLoad {
        path: path_str.clone(),
        message: format!("read error (magic bytes): {}", e),
    })?;
    if &magic != LZ4_MAGIC {
        return Err(ForagerError::IndexLoad {
            path: path_str,
            message: "not an LZ4 index artifact (bad magic)".to_string(),
        });
    }

    let decoder = lz4_flex::frame::FrameDecoder::new(reader);
    let value = bincode::deserialize_from(decoder).map_err(|e| ForagerError::IndexLoad {
        path: path_str,
        message: format!("deserialization failed: {}", e),
    })?;
    info!(path = %path.display(), label, "Index artifact loaded");
    Ok(value)
}

// ─── Flat index ─────────────────────────────────────────────────────

/// Brute-force exact L2 index over a dense vector matrix.
#[derive(Debug, Serialize, Deserialize)]
pub struct FlatIndex {
    pub dim: usize,
    pub vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    /// Top-k nearest neighbors as `(squared_distance, position)` pairs,
    /// closest first. Ties resolve by position for determinism.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(f32, usize)> {
        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(pos, v)| (l2_distance_sq(query, v), pos))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
        scored.truncate(top_k);
        scored
    }
}

/// Sidecar entry: where a vector's chunk came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetaInfo {
    pub collection_src: String,
    pub metadata_version: Option<u32>,
}

/// On-disk sidecar schema; positional indices are JSON object keys.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    id_map: BTreeMap<String, String>,
    meta_map: BTreeMap<String, ChunkMetaInfo>,
}

// ─── Manager ────────────────────────────────────────────────────────

/// Builds, persists, loads and queries vector indexes over the chunk
/// collection.
pub struct VectorIndexManager<'a> {
    store: &'a Store,
    embedding: &'a dyn EmbeddingBackend,
    index_root: PathBuf,
    index: Option<FlatIndex>,
    id_map: HashMap<usize, String>,
    meta_map: HashMap<usize, ChunkMetaInfo>,
}

impl<'a> VectorIndexManager<'a> {
    pub fn new(store: &'a Store, embedding: &'a dyn EmbeddingBackend, index_root: &Path) -> Self {
        VectorIndexManager {
            store,
            embedding,
            index_root: index_root.to_path_buf(),
            index: None,
            id_map: HashMap::new(),
            meta_map: HashMap::new(),
        }
    }

    /// Artifact paths for `(repo, index_name)`.
    fn paths(&self, repo: &str, index_name: &str) -> (PathBuf, PathBuf) {
        let safe = sanitize_repo(repo);
        let base = self.index_root.join(&safe).join(&safe);
        (
            base.join(format!("{}.faiss", index_name)),
            base.join(format!("{}_mapping.json", index_name)),
        )
    }

    /// Build (or rebuild with `force`) the index over all embedded chunks
    /// of the given collections.
    ///
    /// `global=true` fuses several collections under the literal index
    /// name `global`; `global=false` requires exactly one collection whose
    /// name becomes the index name. Zero candidate vectors is a no-op, not
    /// an error.
    pub fn build_index(
        &mut self,
        repo: &str,
        collections: &[String],
        force: bool,
        global: bool,
    ) -> Result<(), ForagerError> {
        let index_name = if global {
            if collections.is_empty() {
                return Err(ForagerError::InvalidIndexMode(
                    "global mode requires at least one collection".to_string(),
                ));
            }
            "global".to_string()
        } else if collections.len() == 1 {
            collections[0].clone()
        } else {
            return Err(ForagerError::InvalidIndexMode(
                "specify exactly one collection, or global mode for several".to_string(),
            ));
        };

        let (index_path, mapping_path) = self.paths(repo, &index_name);
        if !force && index_path.exists() && mapping_path.exists() {
            info!(repo, %index_name, "Index already exists; use force to rebuild");
            return self.load_index(repo, &index_name);
        }

        let metadata_filter = Filter::field("repo", repo)
            .and_field_in("collection_src", collections.iter().cloned());
        let metadata: Vec<MetadataDoc> = self.store.find(METADATA, &metadata_filter)?;
        if metadata.is_empty() {
            info!(repo, %index_name, "No metadata found; index not built");
            return Ok(());
        }
        let meta_by_id: HashMap<String, &MetadataDoc> =
            metadata.iter().map(|m| (m.id.clone(), m)).collect();

        let chunk_filter = Filter::all()
            .and_field_in("metadata_id", meta_by_id.keys().cloned())
            .and_exists("embedding");
        let chunks: Vec<ChunkDoc> = self.store.find(CHUNKS, &chunk_filter)?;

        let mut vectors = Vec::new();
        let mut ids = Vec::new();
        let mut infos = Vec::new();
        let mut dim = 0usize;
        for chunk in chunks {
            if chunk.embedding.is_empty() {
                continue;
            }
            if dim == 0 {
                dim = chunk.embedding.len();
            } else if chunk.embedding.len() != dim {
                warn!(chunk = %chunk.id, "Embedding dimension mismatch, skipping vector");
                continue;
            }
            let meta = meta_by_id.get(&chunk.metadata_id);
            infos.push(ChunkMetaInfo {
                collection_src: meta.map(|m| m.collection_src.clone()).unwrap_or_default(),
                metadata_version: meta.map(|m| m.metadata_version),
            });
            ids.push(chunk.id);
            vectors.push(chunk.embedding);
        }

        if vectors.is_empty() {
            info!(repo, %index_name, "No usable embeddings; index not built");
            return Ok(());
        }

        let count = ids.len();
        let index = FlatIndex { dim, vectors };
        let sidecar = Sidecar {
            id_map: ids
                .iter()
                .enumerate()
                .map(|(pos, id)| (pos.to_string(), id.clone()))
                .collect(),
            meta_map: infos
                .iter()
                .enumerate()
                .map(|(pos, info)| (pos.to_string(), info.clone()))
                .collect(),
        };

        if let Some(parent) = index_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        save_compressed(&index_path, &index, "vector-index")?;
        write_json_atomic(&mapping_path, &sidecar)?;

        self.index = Some(index);
        self.id_map = ids.into_iter().enumerate().collect();
        self.meta_map = infos.into_iter().enumerate().collect();
        info!(repo, %index_name, vectors = count, "Index built and saved");
        Ok(())
    }

    /// Load a previously saved index and sidecar into memory.
    pub fn load_index(&mut self, repo: &str, index_name: &str) -> Result<(), ForagerError> {
        let (index_path, mapping_path) = self.paths(repo, index_name);
        if !index_path.exists() || !mapping_path.exists() {
            return Err(ForagerError::IndexNotFound {
                repo: repo.to_string(),
                index_name: index_name.to_string(),
            });
        }

        let index: FlatIndex = load_compressed(&index_path, "vector-index")?;
        let raw = std::fs::read_to_string(&mapping_path)?;
        let sidecar: Sidecar = serde_json::from_str(&raw)?;

        self.id_map = parse_positions(sidecar.id_map);
        self.meta_map = parse_positions(sidecar.meta_map);
        self.index = Some(index);
        Ok(())
    }

    /// Similarity search: encode the query, rank by L2 distance, resolve
    /// chunk ids through the sidecar map, and fetch the chunk documents in
    /// result order.
    pub fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<(Vec<f32>, Vec<usize>, Vec<ChunkDoc>, Vec<ChunkMetaInfo>), ForagerError> {
        let index = self.index.as_ref().ok_or(ForagerError::IndexNotLoaded)?;

        let query_vec = self.embedding.encode(text);
        if query_vec.len() != index.dim {
            return Err(ForagerError::InvalidArgs(format!(
                "query embedding dimension {} does not match index dimension {}",
                query_vec.len(),
                index.dim
            )));
        }

        let hits = index.search(&query_vec, top_k);
        let mut distances = Vec::with_capacity(hits.len());
        let mut positions = Vec::with_capacity(hits.len());
        let mut docs = Vec::new();
        let mut infos = Vec::new();

        for (distance, pos) in hits {
            distances.push(distance);
            positions.push(pos);
            if let Some(chunk_id) = self.id_map.get(&pos) {
                if let Some(doc) =
                    self.store.find_one::<ChunkDoc>(CHUNKS, &Filter::id(chunk_id))?
                {
                    docs.push(doc);
                }
            }
            infos.push(self.meta_map.get(&pos).cloned().unwrap_or(ChunkMetaInfo {
                collection_src: String::new(),
                metadata_version: None,
            }));
        }

        Ok((distances, positions, docs, infos))
    }

    /// Chunk ids currently covered by the loaded index.
    pub fn loaded_chunk_ids(&self) -> Vec<String> {
        self.id_map.values().cloned().collect()
    }

    pub fn is_loaded(&self) -> bool {
        self.index.is_some()
    }
}

fn parse_positions<T>(map: BTreeMap<String, T>) -> HashMap<usize, T> {
    map.into_iter()
        .filter_map(|(k, v)| k.parse::<usize>().ok().map(|pos| (pos, v)))
        .collect()
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ForagerError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
