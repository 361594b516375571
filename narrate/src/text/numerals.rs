//! Chinese numeral parsing and formatting for chapter headings and file names.

use serde::{Deserialize, Serialize};

const DIGITS: [char; 10] = ['零', '一', '二', '三', '四', '五', '六', '七', '八', '九'];

/// Largest numeral unit a chapter heading may use.
///
/// Bounds which unit characters the boundary detector accepts, so that a line
/// like `第二亿章` is not taken for a heading in a book that never goes past
/// hundreds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NumeralMagnitude {
    Tens,
    Hundreds,
    Thousands,
    #[default]
    TenThousands,
}

impl NumeralMagnitude {
    /// Unit characters allowed at this magnitude, including formal variants.
    pub fn unit_chars(&self) -> &'static str {
        match self {
            Self::Tens => "十拾",
            Self::Hundreds => "十拾百佰",
            Self::Thousands => "十拾百佰千仟",
            Self::TenThousands => "十拾百佰千仟万萬",
        }
    }

    /// Characters that may appear in a Chinese numeral at this magnitude.
    pub fn numeral_chars(&self) -> String {
        format!("零〇一二两三四五六七八九壹贰叁肆伍陆柒捌玖{}", self.unit_chars())
    }
}

impl std::str::FromStr for NumeralMagnitude {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tens" => Ok(Self::Tens),
            "hundreds" => Ok(Self::Hundreds),
            "thousands" => Ok(Self::Thousands),
            "ten-thousands" => Ok(Self::TenThousands),
            other => Err(format!("unknown numeral magnitude: {}", other)),
        }
    }
}

fn digit_value(c: char) -> Option<u64> {
    match c {
        '零' | '〇' => Some(0),
        '一' | '壹' => Some(1),
        '二' | '两' | '贰' => Some(2),
        '三' | '叁' => Some(3),
        '四' | '肆' => Some(4),
        '五' | '伍' => Some(5),
        '六' | '陆' => Some(6),
        '七' | '柒' => Some(7),
        '八' | '捌' => Some(8),
        '九' | '玖' => Some(9),
        _ => None,
    }
}

fn unit_value(c: char) -> Option<u64> {
    match c {
        '十' | '拾' => Some(10),
        '百' | '佰' => Some(100),
        '千' | '仟' => Some(1_000),
        '万' | '萬' => Some(10_000),
        '亿' => Some(100_000_000),
        _ => None,
    }
}

/// Parse a heading numeral: ASCII digits, full-width digits, or Chinese.
///
/// Returns `None` for anything malformed or out of range.
pub fn parse_numeral(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    if s.chars().all(|c| c.is_ascii_digit() || ('０'..='９').contains(&c)) {
        let ascii: String = s
            .chars()
            .map(|c| match c {
                '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
                c => c,
            })
            .collect();
        return ascii.parse().ok();
    }
    parse_chinese(s)
}

/// Parse a Chinese numeral such as `十五`, `一百零五`, or `二〇二四`.
pub fn parse_chinese(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    let mut section: u64 = 0;
    let mut number: Option<u64> = None;

    for c in s.chars() {
        if let Some(d) = digit_value(c) {
            // Digits without units read positionally, as in 二〇二四
            number = Some(match number {
                Some(n) => n.checked_mul(10)?.checked_add(d)?,
                None => d,
            });
            continue;
        }

        match unit_value(c)? {
            u @ (10 | 100 | 1_000) => {
                let n = number.take().unwrap_or(1);
                section = section.checked_add(n.checked_mul(u)?)?;
            }
            u => {
                let group = section.checked_add(number.take().unwrap_or(0))?;
                if group == 0 && total == 0 {
                    return None;
                }
                if u == 10_000 {
                    total = total.checked_add(group.checked_mul(u)?)?;
                } else {
                    total = total.checked_add(group)?.checked_mul(u)?;
                }
                section = 0;
            }
        }
    }

    total
        .checked_add(section)?
        .checked_add(number.unwrap_or(0))
}

/// Format a number as a Chinese numeral (`15` → `十五`, `105` → `一百零五`).
pub fn to_chinese(n: u64) -> String {
    if n == 0 {
        return DIGITS[0].to_string();
    }
    format_grouped(n, false)
}

fn format_grouped(n: u64, inner: bool) -> String {
    const GROUPS: [(u64, char); 2] = [(100_000_000, '亿'), (10_000, '万')];

    for (value, unit) in GROUPS {
        if n >= value {
            let (high, low) = (n / value, n % value);
            let mut out = format_grouped(high, inner);
            out.push(unit);
            if low == 0 {
                return out;
            }
            if low < value / 10 {
                out.push(DIGITS[0]);
                out.push_str(&format_grouped(low, true));
            } else {
                out.push_str(&format_grouped(low, true));
            }
            return out;
        }
    }

    below_ten_thousand(n, inner)
}

fn below_ten_thousand(n: u64, inner: bool) -> String {
    const PLACES: [(u64, Option<char>); 4] =
        [(1_000, Some('千')), (100, Some('百')), (10, Some('十')), (1, None)];

    let mut out = String::new();
    let mut pending_zero = false;

    for (value, unit) in PLACES {
        let d = (n / value % 10) as usize;
        if d == 0 {
            if !out.is_empty() {
                pending_zero = true;
            }
            continue;
        }
        if pending_zero {
            out.push(DIGITS[0]);
            pending_zero = false;
        }
        // 十五 rather than 一十五, except after a higher group (一万零一十)
        let leading_ten = d == 1 && value == 10 && out.is_empty() && !inner;
        if !leading_ten {
            out.push(DIGITS[d]);
        }
        if let Some(unit) = unit {
            out.push(unit);
        }
    }

    out
}
