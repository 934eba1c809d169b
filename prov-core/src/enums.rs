//! Enum types for provenance records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind}: {value}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `as_db_str`, `from_db_str`, `ALL`, `Display` and `FromStr` for a
/// fieldless enum. Parsing is case-insensitive.
macro_rules! impl_db_enum {
    ($type:ident, $kind:literal, { $($variant:ident => $db:literal),+ $(,)? }) => {
        impl $type {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$type] = &[$($type::$variant),+];

            /// Canonical index/wire string.
            pub fn as_db_str(&self) -> &'static str {
                match self {
                    $($type::$variant => $db),+
                }
            }

            /// Parse from the index/wire string, ignoring case.
            pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
                let upper = s.trim().to_ascii_uppercase();
                match upper.as_str() {
                    $($db => Ok($type::$variant),)+
                    _ => Err(EnumParseError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }

            /// Comma separated list of accepted values, for error messages.
            pub fn supported() -> String {
                Self::ALL
                    .iter()
                    .map(|v| v.as_db_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }

        impl fmt::Display for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_db_str())
            }
        }

        impl FromStr for $type {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_db_str(s)
            }
        }
    };
}

// ============================================================================
// OPERATIONS AND ML TAGS
// ============================================================================

/// Filesystem action recorded by an operation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileOperation {
    Create,
    Delete,
    AccessData,
    ModifyData,
}

impl_db_enum!(FileOperation, "file operation", {
    Create => "CREATE",
    Delete => "DELETE",
    AccessData => "ACCESS_DATA",
    ModifyData => "MODIFY_DATA",
});

/// ML asset type attached to a tracked artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MlType {
    Feature,
    TrainingDataset,
    Experiment,
    Model,
    Hive,
    Dataset,
    #[default]
    None,
}

impl_db_enum!(MlType, "ml type", {
    Feature => "FEATURE",
    TrainingDataset => "TRAINING_DATASET",
    Experiment => "EXPERIMENT",
    Model => "MODEL",
    Hive => "HIVE",
    Dataset => "DATASET",
    None => "NONE",
});

/// Document subtype as stored in the `ml_type` column.
///
/// Parent variants mark the root directory of an ML asset, `*Part` variants
/// mark files living inside one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocSubType {
    Feature,
    TrainingDataset,
    Experiment,
    Model,
    Hive,
    Dataset,
    FeaturePart,
    TrainingDatasetPart,
    ExperimentPart,
    ModelPart,
    HivePart,
    DatasetPart,
    #[default]
    None,
}

impl_db_enum!(DocSubType, "document subtype", {
    Feature => "FEATURE",
    TrainingDataset => "TRAINING_DATASET",
    Experiment => "EXPERIMENT",
    Model => "MODEL",
    Hive => "HIVE",
    Dataset => "DATASET",
    FeaturePart => "FEATURE_PART",
    TrainingDatasetPart => "TRAINING_DATASET_PART",
    ExperimentPart => "EXPERIMENT_PART",
    ModelPart => "MODEL_PART",
    HivePart => "HIVE_PART",
    DatasetPart => "DATASET_PART",
    None => "NONE",
});

impl DocSubType {
    /// Root of one of the four footprinted ML asset kinds.
    pub fn is_ml_parent(&self) -> bool {
        matches!(
            self,
            DocSubType::Feature
                | DocSubType::TrainingDataset
                | DocSubType::Experiment
                | DocSubType::Model
        )
    }

    /// File inside one of the four footprinted ML asset kinds.
    pub fn is_ml_part(&self) -> bool {
        matches!(
            self,
            DocSubType::FeaturePart
                | DocSubType::TrainingDatasetPart
                | DocSubType::ExperimentPart
                | DocSubType::ModelPart
        )
    }

    /// The ML type this subtype belongs to (parts map to their parent type).
    pub fn ml_type(&self) -> MlType {
        match self {
            DocSubType::Feature | DocSubType::FeaturePart => MlType::Feature,
            DocSubType::TrainingDataset | DocSubType::TrainingDatasetPart => {
                MlType::TrainingDataset
            }
            DocSubType::Experiment | DocSubType::ExperimentPart => MlType::Experiment,
            DocSubType::Model | DocSubType::ModelPart => MlType::Model,
            DocSubType::Hive | DocSubType::HivePart => MlType::Hive,
            DocSubType::Dataset | DocSubType::DatasetPart => MlType::Dataset,
            DocSubType::None => MlType::None,
        }
    }
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Lifecycle state of an application run. Declaration order is lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Submitted,
    Running,
    Finished,
    Killed,
    Failed,
    Unknown,
}

impl_db_enum!(AppState, "app state", {
    Submitted => "SUBMITTED",
    Running => "RUNNING",
    Finished => "FINISHED",
    Killed => "KILLED",
    Failed => "FAILED",
    Unknown => "UNKNOWN",
});

impl AppState {
    /// Check if the application can no longer change state.
    pub fn is_final(&self) -> bool {
        matches!(self, AppState::Finished | AppState::Killed | AppState::Failed)
    }
}

// ============================================================================
// QUERY SHAPES
// ============================================================================

/// Footprint bucket requested by a caller or assigned to an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FootprintType {
    All,
    Input,
    OutputModified,
    OutputAdded,
    OutputTmp,
    OutputRemoved,
}

impl_db_enum!(FootprintType, "footprint type", {
    All => "ALL",
    Input => "INPUT",
    OutputModified => "OUTPUT_MODIFIED",
    OutputAdded => "OUTPUT_ADDED",
    OutputTmp => "OUTPUT_TMP",
    OutputRemoved => "OUTPUT_REMOVED",
});

/// Kind of document stored in a project provenance index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    State,
    Operation,
    Archive,
}

impl_db_enum!(EntryType, "entry type", {
    State => "STATE",
    Operation => "OPERATION",
    Archive => "ARCHIVE",
});

impl EntryType {
    /// Value stored in the `entry_type` column.
    pub fn column_value(&self) -> &'static str {
        match self {
            EntryType::State => "state",
            EntryType::Operation => "operation",
            EntryType::Archive => "archive",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl_db_enum!(SortOrder, "sort order", {
    Asc => "ASC",
    Desc => "DESC",
});

/// Result shape of a provenance query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnType {
    List,
    Count,
    MinTree,
    FullTree,
    Artifacts,
}

impl_db_enum!(ReturnType, "return type", {
    List => "LIST",
    Count => "COUNT",
    MinTree => "MIN_TREE",
    FullTree => "FULL_TREE",
    Artifacts => "ARTIFACTS",
});

/// Optional result expansions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Expansion {
    App,
}

impl_db_enum!(Expansion, "expansion", {
    App => "APP",
});

// ============================================================================
// TESTS
// ============================================================================
