//! 配置模块，负责加载JSON配置文件
//!
//! 配置文件格式:
//!
//! ```json
//! {
//!   "preserveCase": true,
//!   "table": "records",
//!   "fields": {
//!     "Age": { "startingInstance": 0, "numInstances": 1, "startingMeasurement": 0, "numMeasurements": 1 }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generator::{FieldMetadata, FieldMetadataLookup};

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置文件不存在: {}", .0.display())]
    NotFound(PathBuf),

    #[error("无法读取配置文件 {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("无法解析JSON配置文件 {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// 字段目录：字段ID到字段元数据的映射
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldCatalog(BTreeMap<String, FieldMetadata>);

impl FieldCatalog {
    pub fn get(&self, field_id: &str) -> Option<&FieldMetadata> {
        self.0.get(field_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 按字段ID排序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldMetadata)> {
        self.0.iter().map(|(id, metadata)| (id.as_str(), metadata))
    }
}

impl FromIterator<(String, FieldMetadata)> for FieldCatalog {
    fn from_iter<I: IntoIterator<Item = (String, FieldMetadata)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FieldMetadataLookup for FieldCatalog {
    fn field_metadata(&self, field_id: &str) -> Option<FieldMetadata> {
        self.get(field_id).copied()
    }
}

/// 编译器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerConfig {
    /// 关键字是否区分大小写
    #[serde(default = "default_preserve_case")]
    pub preserve_case: bool,
    /// SQL 输出使用的表名
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub fields: FieldCatalog,
}

fn default_preserve_case() -> bool {
    true
}

fn default_table() -> String {
    "records".to_string()
}

impl CompilerConfig {
    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        // 检查文件是否存在
        if !path_ref.exists() {
            return Err(ConfigError::NotFound(path_ref.to_path_buf()));
        }

        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_ref.to_path_buf(),
            source,
        })
    }

    /// 获取字段元数据，未注册时返回 None
    pub fn field(&self, field_id: &str) -> Option<&FieldMetadata> {
        self.fields.get(field_id)
    }
}

impl FieldMetadataLookup for CompilerConfig {
    fn field_metadata(&self, field_id: &str) -> Option<FieldMetadata> {
        self.fields.field_metadata(field_id)
    }
}

/// 默认配置（用于演示或fallback），带一个小型示例字段目录
impl Default for CompilerConfig {
    fn default() -> Self {
        let fields = [
            ("Sex", FieldMetadata::single()),
            ("Age", FieldMetadata::single()),
            ("Height", FieldMetadata::new(0, 3, 0, 1)),
            ("Weight", FieldMetadata::new(0, 3, 0, 1)),
            ("BloodPressure", FieldMetadata::new(0, 2, 0, 2)),
            ("31", FieldMetadata::single()),
        ]
        .into_iter()
        .map(|(id, metadata)| (id.to_string(), metadata))
        .collect();

        Self {
            preserve_case: default_preserve_case(),
            table: default_table(),
            fields,
        }
    }
}
