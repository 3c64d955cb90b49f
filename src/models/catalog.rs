//! 页面目录：从输入目录推导出稳定的规范标识集合

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::infrastructure::artifact_store::list_images;
use crate::models::ItemId;

/// 页面目录
///
/// 按自然顺序保存 规范标识 → 源图片路径。多次运行之间保持稳定。
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    sources: BTreeMap<ItemId, PathBuf>,
}

impl Catalog {
    /// 扫描输入目录构建目录
    ///
    /// 两个文件归并到同一标识时，按文件名自然顺序靠后的那个生效。
    pub fn load(input_dir: &Path) -> PipelineResult<Self> {
        if !input_dir.is_dir() {
            return Err(PipelineError::InputDirMissing(input_dir.to_path_buf()));
        }

        let files = list_images(input_dir)?;
        if files.is_empty() {
            return Err(PipelineError::EmptyCatalog(input_dir.to_path_buf()));
        }

        let mut sources = BTreeMap::new();
        for file_name in files {
            let id = ItemId::from_filename(&file_name);
            let path = input_dir.join(&file_name);
            if let Some(previous) = sources.insert(id.clone(), path) {
                warn!(
                    "⚠️ 页面 {} 对应多个源文件，使用 {} 替换 {}",
                    id,
                    file_name,
                    previous.display()
                );
            }
        }

        info!("✓ 在 {} 中找到 {} 个页面", input_dir.display(), sources.len());
        Ok(Self { sources })
    }

    /// 从现成的映射构建（测试和工具使用）
    pub fn from_sources(sources: impl IntoIterator<Item = (ItemId, PathBuf)>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// 按自然顺序遍历标识
    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.sources.keys()
    }

    pub fn source(&self, id: &ItemId) -> Option<&Path> {
        self.sources.get(id).map(PathBuf::as_path)
    }
}
