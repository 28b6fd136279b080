//! # 名称编解码
//!
//! 每个名字（"."与".."除外）都会生成一串长目录项，外加一个8.3短名称。
//! 长名超过8个字节时，短名称第6、7位改写为`~N`，
//! `N`由目录内前6字节相同且第6位为`~`的短名称数量决定。

use alloc::string::String;
use alloc::vec::Vec;

use vfs::{Corruption, Error};

use super::dir_entry::{LongDirEntry, checksum};
use crate::Result;

/// 长名最多容纳的UTF-16单元数
pub const NAME_MAX: usize = 255;

/// 长名结束后的填充
const PADDING: u16 = 0xFFFF;

/// 能放进目录项的名字
pub fn validate(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\0'])
        || name.encode_utf16().count() > NAME_MAX
    {
        return Err(Error::InvalidName);
    }
    Ok(())
}

/// 短名称里允许出现的字符，其余一律换成'_'
fn short_char(c: char) -> u8 {
    match c {
        'a'..='z' => c.to_ascii_uppercase() as u8,
        'A'..='Z' | '0'..='9' => c as u8,
        '$' | '%' | '\'' | '-' | '_' | '@' | '~' | '`' | '!' | '(' | ')' | '{' | '}' | '^'
        | '#' | '&' => c as u8,
        _ => b'_',
    }
}

fn fill(dst: &mut [u8], src: &str) {
    for (b, c) in dst.iter_mut().zip(src.chars()) {
        *b = short_char(c);
    }
}

/// 由长名生成短名称，第二项表示是否还需要`~N`后缀。
///
/// 文件名在第一个'.'处拆为主名与扩展名；目录名不拆，只取前8个字符。
pub fn short_name(name: &str, is_dir: bool) -> ([u8; 11], bool) {
    let mut short = [b' '; 11];

    if is_dir {
        fill(&mut short[..8], name);
    } else {
        let (base, ext) = name.split_once('.').unwrap_or((name, ""));
        fill(&mut short[..8], if base.is_empty() { "_" } else { base });
        fill(&mut short[8..], ext);
    }

    (short, name.len() > 8)
}

/// 已有的短名称`existing`是否与`short`争用同一组`~N`
#[inline]
pub fn shares_tilde(short: &[u8; 11], existing: &[u8; 11]) -> bool {
    short[..6] == existing[..6] && existing[6] == b'~'
}

/// 以目录内已有`count`个同组短名称为前提，写入`~N`
pub fn with_tilde(mut short: [u8; 11], count: usize) -> [u8; 11] {
    short[6] = b'~';
    short[7] = b'1'.wrapping_add(count as u8);
    short
}

/// 生成长目录项，按盘上顺序（序号从大到小）排列
pub fn long_entries(name: &str, short: &[u8; 11]) -> Vec<LongDirEntry> {
    let chksum = checksum(short);
    let units: Vec<u16> = name.encode_utf16().collect();

    let mut longs: Vec<_> = units
        .chunks(LongDirEntry::CAP)
        .enumerate()
        .map(|(i, chunk)| {
            let mut entry = LongDirEntry {
                ord: (i + 1) as u8,
                chksum,
                name: [PADDING; LongDirEntry::CAP],
            };
            entry.name[..chunk.len()].copy_from_slice(chunk);
            if chunk.len() < LongDirEntry::CAP {
                entry.name[chunk.len()] = 0;
            }
            entry
        })
        .collect();

    if let Some(last) = longs.last_mut() {
        last.ord |= LongDirEntry::LAST_MASK;
    }
    longs.reverse();
    longs
}

/// 把按序号从小到大排列的长目录项拼回长名
pub fn decode_long<'a>(entries: impl IntoIterator<Item = &'a LongDirEntry>) -> Result<String> {
    let units: Vec<u16> = entries
        .into_iter()
        .flat_map(|entry| entry.name)
        .take_while(|&unit| unit != 0 && unit != PADDING)
        .collect();

    String::from_utf16(&units).map_err(|_| Error::Corrupt(Corruption::BadName))
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    #[test]
    fn short_names() {
        assert_eq!((*b"HI      TXT", false), short_name("hi.txt", false));
        assert_eq!((*b"HELLO   TXT", true), short_name("hello.txt", false));
        assert_eq!((*b"AVERYLONTXT", true), short_name("averylongfilename.txt", false));
        assert_eq!((*b"USR        ", false), short_name("usr", true));
        assert_eq!((*b"A_B_C   TAR", true), short_name("a b+c.tar.gz", false));

        let (short, tilde) = short_name("averylongfilename.txt", false);
        assert!(tilde);
        let first = with_tilde(short, 0);
        assert_eq!(b"AVERYL~1TXT", &first);
        assert!(shares_tilde(&short, &first));
        assert_eq!(b"AVERYL~2TXT", &with_tilde(short, 1));
        assert!(!shares_tilde(&short, b"AVERYLONTXT"));
    }

    #[test]
    fn long_name_round_trip() {
        let name = "averylongfilename.txt";
        let short = with_tilde(short_name(name, false).0, 0);
        let longs = long_entries(name, &short);

        assert_eq!(2, longs.len());
        assert_eq!(2 | LongDirEntry::LAST_MASK, longs[0].ord);
        assert_eq!(1, longs[1].ord);
        assert!(longs.iter().all(|e| e.chksum == checksum(&short)));
        // 21个单元：第二项里8个字符，随后是结束符与填充
        assert_eq!(0, longs[0].name[8]);
        assert_eq!(0xFFFF, longs[0].name[9]);

        let in_order: Vec<_> = longs.iter().rev().collect();
        assert_eq!(name, decode_long(in_order).unwrap());
    }

    #[test]
    fn exact_multiple_has_no_terminator() {
        let name = "abcdefghijklm";
        let longs = long_entries(name, b"ABCDEF~1   ");
        assert_eq!(1, longs.len());
        assert!(longs[0].name.iter().all(|&u| u != 0 && u != 0xFFFF));
        assert_eq!(name, decode_long(&longs).unwrap());
    }

    #[test]
    fn unicode_and_invalid_names() {
        let name = "文件名.txt";
        let longs = long_entries(name, b"___     TXT");
        assert_eq!(name, decode_long(&longs).unwrap());

        assert_eq!(Err(Error::InvalidName), validate(""));
        assert_eq!(Err(Error::InvalidName), validate(".."));
        assert_eq!(Err(Error::InvalidName), validate("a/b"));
        assert_eq!(Err(Error::InvalidName), validate(&"x".repeat(256)));
        assert!(validate(&"x".repeat(255)).is_ok());
    }
}
