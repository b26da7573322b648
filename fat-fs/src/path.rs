//! # 路径解析
//!
//! 纯解析，不触碰磁盘：把文本路径拆成有序的中间目录成分加最终名称。
//! 任何成分超过名称上限即整条路径无效——必须在任何目录变更之前察觉，
//! 过长的名字绝不允许部分成功。

use alloc::string::String;
use alloc::vec::Vec;

use crate::NAME_MAX;

/// 解析完成的路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    absolute: bool,
    /// 需要逐级下降的中间目录
    dirs: Vec<String>,
    /// 最终名称；[`None`]是"根目录自身"的哨兵（如`"/"`）
    filename: Option<String>,
}

impl Path {
    /// 解析文本路径。
    /// 返回[`None`]表示路径无效：空路径，或某个成分过长。
    pub fn parse(text: &str) -> Option<Self> {
        let absolute = text.starts_with('/');

        let mut cmps = Vec::new();
        for token in text.split('/').filter(|t| !t.is_empty()) {
            if token.len() > NAME_MAX {
                return None;
            }
            cmps.push(String::from(token));
        }

        match cmps.pop() {
            Some(filename) => Some(Self {
                absolute,
                dirs: cmps,
                filename: Some(filename),
            }),
            // 只有分隔符：根目录本身
            None if absolute => Some(Self {
                absolute: true,
                dirs: Vec::new(),
                filename: None,
            }),
            None => None,
        }
    }

    #[inline]
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    #[inline]
    pub fn dirs(&self) -> &[String] {
        &self.dirs
    }

    #[inline]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }
}
