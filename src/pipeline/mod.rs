pub mod binding; // Strict / best-effort parameter binding
pub mod catalog; // Subtypes, architecture families, candidate lists
pub mod checkpoint; // safetensors state dicts + slot paths
pub mod library; // Model backend selection (candle behind a feature)
pub mod network; // Network / ModelLibrary traits
pub mod orchestrator;
pub mod resolver; // Ordered architecture search
pub mod seizure; // Tabular EEG screen + CSV acceptance
pub mod stages;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_support;
