use std::path::{Path, PathBuf};

/// 文件存储层错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("路径不存在: {0}")]
    NotFound(PathBuf),

    #[error("无权访问: {0}")]
    PermissionDenied(PathBuf),

    #[error("读取 {path} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("监听失败: {0}")]
    Watch(String),
}

impl StoreError {
    /// 按 io::ErrorKind 归类
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// 查询调用方错误（只覆盖编程错误类输入）
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("max_results 必须大于 0")]
    InvalidMaxResults,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified_by_kind() {
        let p = Path::new("/a/b");
        let e = StoreError::from_io(p, std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(e.is_not_found());

        let e = StoreError::from_io(p, std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(matches!(e, StoreError::PermissionDenied(_)));

        let e = StoreError::from_io(p, std::io::Error::other("boom"));
        assert!(matches!(e, StoreError::Io { .. }));
        assert!(e.to_string().contains("/a/b"));
    }
}
