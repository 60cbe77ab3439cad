//! STRM 内容的生成与解析
//!
//! 格式: `{base}/{backend}/url/video.{ext}?pickcode=..&userid=..&sign=..&path=..`，
//! 只出现当前网盘用得到的参数。

use crate::db::BackendType;
use crate::driver::PointerPolicy;
use url::Url;

/// STRM 文件扩展名
pub const POINTER_EXT: &str = "strm";

const ADDRESS_SEGMENT: &str = "url";
const SUFFIX_PREFIX: &str = "video.";

/// STRM 链接拆出的字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointerTokens {
    /// scheme://host[:port]，仅解析时填充
    pub origin: String,
    pub backend: String,
    /// 地址末尾的扩展名
    pub suffix: String,
    pub pick_code: Option<String>,
    pub user_id: Option<String>,
    pub sign: Option<String>,
    pub path: Option<String>,
}

impl PointerTokens {
    pub fn new(backend: BackendType, suffix: &str) -> Self {
        Self {
            backend: backend.as_str().to_string(),
            suffix: suffix.to_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_pick_code(mut self, pick_code: impl Into<String>) -> Self {
        self.pick_code = Some(pick_code.into());
        self
    }

    pub fn with_user_id(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.filter(|u| !u.is_empty()).map(str::to_string);
        self
    }

    pub fn with_sign(mut self, sign: &str) -> Self {
        self.sign = Some(sign.to_string()).filter(|s| !s.is_empty());
        self
    }

    /// 需要时写入远端路径
    pub fn with_path(mut self, path: Option<String>) -> Self {
        self.path = path;
        self
    }

    /// 生成链接
    pub fn to_url(&self, base_url: &str) -> String {
        let mut url = format!(
            "{}/{}/{}/{}{}",
            base_url.trim_end_matches('/'),
            self.backend,
            ADDRESS_SEGMENT,
            SUFFIX_PREFIX,
            self.suffix
        );

        let params = [
            ("pickcode", &self.pick_code),
            ("userid", &self.user_id),
            ("sign", &self.sign),
            ("path", &self.path),
        ];
        let query: Vec<String> = params
            .iter()
            .filter_map(|(key, value)| {
                value
                    .as_ref()
                    .map(|v| format!("{}={}", key, urlencoding::encode(v)))
            })
            .collect();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }

    /// 解析已有的 STRM 内容，格式不符返回 None
    pub fn parse(content: &str) -> Option<Self> {
        let url = Url::parse(content.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }

        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        let n = segments.len();
        if n < 3 || segments[n - 2] != ADDRESS_SEGMENT {
            return None;
        }
        let suffix = segments[n - 1].strip_prefix(SUFFIX_PREFIX)?.to_lowercase();

        let mut tokens = PointerTokens {
            origin: url.origin().ascii_serialization(),
            backend: segments[n - 3].to_string(),
            suffix,
            ..Default::default()
        };
        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "pickcode" => tokens.pick_code = Some(value),
                "userid" => tokens.user_id = Some(value),
                "sign" => tokens.sign = Some(value),
                "path" => tokens.path = Some(value),
                _ => {}
            }
        }
        Some(tokens)
    }
}

/// 已有内容是否仍然有效
///
/// `expected` 是按当前节点和配置重新生成的内容，只比较当前网盘认定的字段。
pub fn is_current(existing: &str, expected: &str, policy: &PointerPolicy, embed_path: bool) -> bool {
    let (Some(have), Some(want)) = (PointerTokens::parse(existing), PointerTokens::parse(expected))
    else {
        return false;
    };

    if have.origin != want.origin {
        return false;
    }
    if embed_path {
        if have.path.is_none() || have.path != want.path {
            return false;
        }
    } else if have.path.is_some() {
        return false;
    }
    // 只要求 pickcode 存在，不比较取值
    if have.pick_code.as_deref().map_or(true, str::is_empty) {
        return false;
    }
    if policy.signed && have.sign != want.sign {
        return false;
    }
    if have.suffix != want.suffix {
        return false;
    }
    if policy.user_id.is_some() && have.user_id != want.user_id {
        return false;
    }
    true
}
