//! Compiled contract artifacts (ABI + creation bytecode).

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use anyhow::{Context, Result};
use serde::{Deserialize, de::DeserializeOwned};

/// ABI and creation bytecode of a compiled contract.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    /// Identifier the artifact was requested by.
    pub identifier: String,
    pub contract_name: String,
    /// Source file the contract was compiled from, when the artifact records it.
    pub source_name: Option<String>,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    pub fn new(identifier: impl Into<String>, abi: JsonAbi, bytecode: Bytes) -> Self {
        let identifier = identifier.into();
        Self {
            contract_name: identifier.clone(),
            identifier,
            source_name: None,
            abi,
            bytecode,
        }
    }
}

/// Resolves contract identifiers to artifacts.
pub trait ArtifactStore: Send + Sync {
    fn load(&self, identifier: &str) -> Result<ContractArtifact>;
}

impl ArtifactStore for HashMap<String, ContractArtifact> {
    fn load(&self, identifier: &str) -> Result<ContractArtifact> {
        self.get(identifier)
            .cloned()
            .with_context(|| format!("Unknown contract artifact: {identifier}"))
    }
}

/// Compiler metadata needed to verify a contract on an explorer.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// e.g. `0.8.24+commit.e11b9ed9`
    pub solc_long_version: String,
    /// Standard-JSON compiler input.
    pub input: serde_json::Value,
    /// `path/To.sol:Name`
    pub fully_qualified_name: String,
}

/// Artifacts directory produced by Hardhat (`artifacts/`) or Foundry (`out/`).
///
/// Identifiers are either bare contract names (`Hello`), looked up recursively, or fully
/// qualified names (`contracts/Hello.sol:Hello`).
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    contract_name: Option<String>,
    source_name: Option<String>,
    abi: JsonAbi,
    bytecode: BytecodeField,
}

/// Hardhat stores the bytecode as a hex string, Foundry as `{ "object": "0x..." }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum BytecodeField {
    Hex(Bytes),
    Object { object: Bytes },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfoFile {
    solc_long_version: String,
    input: serde_json::Value,
}

impl ArtifactDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, identifier: &str) -> Result<PathBuf> {
        if let Some((source, name)) = identifier.split_once(':') {
            let path = self.root.join(source).join(format!("{name}.json"));
            if !path.exists() {
                anyhow::bail!("Artifact not found for {}: {}", identifier, path.display());
            }
            return Ok(path);
        }

        let file_name = format!("{identifier}.json");
        let mut matches = Vec::new();
        find_files(&self.root, &file_name, &mut matches)
            .with_context(|| format!("Failed to scan {}", self.root.display()))?;

        match matches.len() {
            0 => anyhow::bail!(
                "Artifact not found for {} under {}",
                identifier,
                self.root.display()
            ),
            1 => Ok(matches.remove(0)),
            n => anyhow::bail!(
                "{} artifacts named {} under {}, use a fully qualified name (path/To.sol:{})",
                n,
                identifier,
                self.root.display(),
                identifier
            ),
        }
    }

    /// Compiler input and version for `identifier`, read through Hardhat's `.dbg.json` pointer.
    pub fn build_info(&self, identifier: &str) -> Result<BuildInfo> {
        let artifact_path = self.locate(identifier)?;
        let artifact = self.load(identifier)?;

        let debug_path = artifact_path.with_extension("dbg.json");
        let debug: DebugFile = read_json(&debug_path)?;
        let build_path = debug_path
            .parent()
            .context("Debug file must have a parent directory")?
            .join(debug.build_info);
        let build: BuildInfoFile = read_json(&build_path)?;

        let source_name = artifact
            .source_name
            .with_context(|| format!("Artifact {identifier} does not record its source file"))?;

        Ok(BuildInfo {
            solc_long_version: build.solc_long_version,
            input: build.input,
            fully_qualified_name: format!("{}:{}", source_name, artifact.contract_name),
        })
    }
}

impl ArtifactStore for ArtifactDir {
    fn load(&self, identifier: &str) -> Result<ContractArtifact> {
        let path = self.locate(identifier)?;
        let file: ArtifactFile = read_json(&path)?;

        let contract_name = file.contract_name.unwrap_or_else(|| {
            identifier
                .rsplit(':')
                .next()
                .unwrap_or(identifier)
                .to_string()
        });
        let bytecode = match file.bytecode {
            BytecodeField::Hex(bytes) | BytecodeField::Object { object: bytes } => bytes,
        };

        tracing::debug!(identifier, path = %path.display(), "Loaded contract artifact");

        Ok(ContractArtifact {
            identifier: identifier.to_string(),
            contract_name,
            source_name: file.source_name,
            abi: file.abi,
            bytecode,
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn find_files(dir: &Path, file_name: &str, matches: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == "build-info") {
                continue;
            }
            find_files(&path, file_name, matches)?;
        } else if path.file_name().is_some_and(|n| n == file_name) {
            matches.push(path);
        }
    }
    Ok(())
}
