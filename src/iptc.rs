//! IPTC Information Interchange Model records.
//!
//! Each dataset is encoded as `0x1C record dataset length data`. Lengths
//! above 32767 use the extended form, where the high bit of the length word
//! is set and its low bits give the size of the real length field.
//!
//! Images carry the records inside a container. JPEG files use a Photoshop
//! image resource (`8BIM`, id 0x0404) in the APP13 segment. PNG files use a
//! hex-encoded `Raw profile type iptc` text chunk.

use std::fmt::Write as _;

const TAG_MARKER: u8 = 0x1C;
const EXTENDED_LENGTH: u16 = 0x8000;

/// Photoshop resource id holding IIM records.
pub(crate) const IPTC_RESOURCE_ID: u16 = 0x0404;
pub(crate) const PHOTOSHOP_SIGNATURE: &[u8] = b"Photoshop 3.0\0";
pub(crate) const PNG_PROFILE_KEYWORD: &str = "Raw profile type iptc";

const CODED_CHARACTER_SET: (u8, u8) = (1, 90);
const RECORD_VERSION: (u8, u8) = (2, 0);
const OBJECT_NAME: (u8, u8) = (2, 5);
const KEYWORDS: (u8, u8) = (2, 25);

/// `ESC % G`, the ISO 2022 designation for UTF-8.
const UTF8_DESIGNATION: &[u8] = &[0x1B, 0x25, 0x47];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DataSet {
    pub(crate) record: u8,
    pub(crate) dataset: u8,
    pub(crate) data: Vec<u8>,
}

impl DataSet {
    fn new(tag: (u8, u8), data: impl Into<Vec<u8>>) -> Self {
        Self {
            record: tag.0,
            dataset: tag.1,
            data: data.into(),
        }
    }

    fn is(&self, tag: (u8, u8)) -> bool {
        (self.record, self.dataset) == tag
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct IptcRecords {
    pub(crate) datasets: Vec<DataSet>,
}

impl IptcRecords {
    /// Parses raw IIM bytes, stopping quietly at trailing padding.
    pub(crate) fn parse(mut bytes: &[u8]) -> Option<Self> {
        let mut datasets = Vec::new();
        while let [TAG_MARKER, record, dataset, rest @ ..] = bytes {
            let [hi, lo, rest @ ..] = rest else {
                return None;
            };
            let word = u16::from_be_bytes([*hi, *lo]);
            let (len, rest) = if word & EXTENDED_LENGTH != 0 {
                let size = usize::from(word & !EXTENDED_LENGTH);
                if size == 0 || size > 8 || rest.len() < size {
                    return None;
                }
                let len = rest[..size]
                    .iter()
                    .fold(0_usize, |acc, b| (acc << 8) | usize::from(*b));
                (len, &rest[size..])
            } else {
                (usize::from(word), rest)
            };
            if rest.len() < len {
                return None;
            }
            datasets.push(DataSet {
                record: *record,
                dataset: *dataset,
                data: rest[..len].to_vec(),
            });
            bytes = &rest[len..];
        }
        if bytes.iter().any(|b| *b != 0) {
            return None;
        }
        Some(Self { datasets })
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for set in &self.datasets {
            out.extend_from_slice(&[TAG_MARKER, set.record, set.dataset]);
            match u16::try_from(set.data.len()) {
                Ok(len) if len < EXTENDED_LENGTH => out.extend_from_slice(&len.to_be_bytes()),
                _ => {
                    out.extend_from_slice(&(EXTENDED_LENGTH | 4).to_be_bytes());
                    out.extend_from_slice(&(set.data.len() as u32).to_be_bytes());
                }
            }
            out.extend_from_slice(&set.data);
        }
        out
    }

    /// Replaces title and keywords, keeping every unrelated dataset.
    ///
    /// Datasets stay in ascending record and dataset order, as IIM readers
    /// expect. Repeated datasets such as keywords keep their relative order.
    pub(crate) fn set_description(&mut self, name: &str, keywords: &[String]) {
        let mut datasets = vec![
            DataSet::new(CODED_CHARACTER_SET, UTF8_DESIGNATION),
            DataSet::new(RECORD_VERSION, [0x00, 0x04]),
            DataSet::new(OBJECT_NAME, name.as_bytes()),
        ];
        datasets.extend(
            keywords
                .iter()
                .map(|keyword| DataSet::new(KEYWORDS, keyword.as_bytes())),
        );
        datasets.extend(self.datasets.drain(..).filter(|set| {
            ![CODED_CHARACTER_SET, RECORD_VERSION, OBJECT_NAME, KEYWORDS]
                .iter()
                .any(|tag| set.is(*tag))
        }));
        datasets.sort_by_key(|set| (set.record, set.dataset));
        self.datasets = datasets;
    }

    pub(crate) fn object_name(&self) -> Option<String> {
        self.datasets
            .iter()
            .find(|set| set.is(OBJECT_NAME))
            .map(|set| String::from_utf8_lossy(&set.data).into_owned())
    }

    pub(crate) fn keywords(&self) -> Vec<String> {
        self.datasets
            .iter()
            .filter(|set| set.is(KEYWORDS))
            .map(|set| String::from_utf8_lossy(&set.data).into_owned())
            .collect()
    }
}

/// One Photoshop image resource block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageResource {
    pub(crate) id: u16,
    /// Pascal string name, including its length byte and padding.
    pub(crate) name: Vec<u8>,
    pub(crate) data: Vec<u8>,
}

/// Splits an APP13 payload (after the signature) into resource blocks.
pub(crate) fn parse_resources(mut bytes: &[u8]) -> Option<Vec<ImageResource>> {
    let mut resources = Vec::new();
    while bytes.len() >= 4 && &bytes[..4] == b"8BIM" {
        let rest = &bytes[4..];
        if rest.len() < 3 {
            return None;
        }
        let id = u16::from_be_bytes([rest[0], rest[1]]);
        // Length byte plus name, padded to an even size.
        let name_len = (usize::from(rest[2]) + 2) & !1;
        let rest = &rest[2..];
        if rest.len() < name_len + 4 {
            return None;
        }
        let name = rest[..name_len].to_vec();
        let rest = &rest[name_len..];
        let size = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let rest = &rest[4..];
        if rest.len() < size {
            return None;
        }
        let data = rest[..size].to_vec();
        let padded = (size + 1) & !1;
        bytes = rest.get(padded..).unwrap_or_default();
        resources.push(ImageResource { id, name, data });
    }
    Some(resources)
}

pub(crate) fn encode_resources(resources: &[ImageResource]) -> Vec<u8> {
    let mut out = Vec::new();
    for resource in resources {
        out.extend_from_slice(b"8BIM");
        out.extend_from_slice(&resource.id.to_be_bytes());
        if resource.name.is_empty() {
            out.extend_from_slice(&[0, 0]);
        } else {
            out.extend_from_slice(&resource.name);
        }
        out.extend_from_slice(&(resource.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&resource.data);
        if resource.data.len() % 2 == 1 {
            out.push(0);
        }
    }
    out
}

/// Rewrites an APP13 payload (or creates one) with the given IIM records.
pub(crate) fn rewrite_app13(
    existing: Option<&[u8]>,
    update: impl FnOnce(&mut IptcRecords),
) -> Vec<u8> {
    let mut resources = existing
        .and_then(|payload| payload.strip_prefix(PHOTOSHOP_SIGNATURE))
        .and_then(parse_resources)
        .unwrap_or_default();

    let position = resources.iter().position(|r| r.id == IPTC_RESOURCE_ID);
    let mut records = position
        .and_then(|i| IptcRecords::parse(&resources[i].data))
        .unwrap_or_default();
    update(&mut records);

    let resource = ImageResource {
        id: IPTC_RESOURCE_ID,
        name: Vec::new(),
        data: records.encode(),
    };
    match position {
        Some(i) => resources[i].data = resource.data,
        None => resources.push(resource),
    }

    let mut payload = PHOTOSHOP_SIGNATURE.to_vec();
    payload.extend(encode_resources(&resources));
    payload
}

/// Encodes IIM bytes the way ImageMagick writes raw profiles into PNG text.
pub(crate) fn encode_png_profile(iim: &[u8]) -> String {
    let mut text = format!("\niptc\n{:8}\n", iim.len());
    for line in iim.chunks(36) {
        for byte in line {
            let _ = write!(text, "{byte:02x}");
        }
        text.push('\n');
    }
    text
}

pub(crate) fn decode_png_profile(text: &str) -> Option<Vec<u8>> {
    let mut lines = text.trim_start_matches('\n').splitn(3, '\n');
    let _profile_name = lines.next()?;
    let len: usize = lines.next()?.trim().parse().ok()?;
    let hex: Vec<u8> = lines
        .next()?
        .bytes()
        .filter(|b| b.is_ascii_hexdigit())
        .collect();
    if hex.len() < len * 2 {
        return None;
    }
    hex.chunks(2)
        .take(len)
        .map(|pair| {
            let digits = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(digits, 16).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn keywords_survive_encoding_in_order() {
        let words = keywords(&["mountain", "lake", "Café", "morning fog", "lake"]);
        let mut records = IptcRecords::default();
        records.set_description("Misty lake at dawn", &words);

        let parsed = IptcRecords::parse(&records.encode()).unwrap();
        assert_eq!(parsed.keywords(), words);
        assert_eq!(parsed.object_name().as_deref(), Some("Misty lake at dawn"));
    }

    #[test]
    fn set_description_keeps_unrelated_datasets() {
        let mut records = IptcRecords {
            datasets: vec![
                DataSet::new((2, 25), "old"),
                DataSet::new((2, 116), "© Someone"),
                DataSet::new((1, 0), [0, 4]),
                DataSet::new((2, 5), "old title"),
            ],
        };
        records.set_description("new title", &keywords(&["a", "b"]));

        assert_eq!(records.keywords(), ["a", "b"]);
        assert_eq!(records.object_name().as_deref(), Some("new title"));
        assert!(records.datasets.iter().any(|s| s.is((2, 116))));
        let character_set = records.datasets.iter().find(|s| s.is((1, 90))).unwrap();
        assert_eq!(character_set.data, UTF8_DESIGNATION);
    }

    #[test]
    fn datasets_are_written_in_ascending_order() {
        let mut records = IptcRecords {
            datasets: vec![
                DataSet::new((2, 116), "© Someone"),
                DataSet::new((2, 15), "NAT"),
                DataSet::new((1, 0), [0, 4]),
                DataSet::new((2, 10), "5"),
            ],
        };
        records.set_description("t", &keywords(&["zebra", "apple", "mango"]));

        let tags: Vec<(u8, u8)> = records
            .datasets
            .iter()
            .map(|s| (s.record, s.dataset))
            .collect();
        assert_eq!(
            tags,
            [
                (1, 0),
                (1, 90),
                (2, 0),
                (2, 5),
                (2, 10),
                (2, 15),
                (2, 25),
                (2, 25),
                (2, 25),
                (2, 116),
            ]
        );
        assert_eq!(records.keywords(), ["zebra", "apple", "mango"]);
    }

    #[test]
    fn extended_length_datasets_parse() {
        let records = IptcRecords {
            datasets: vec![DataSet::new((2, 120), vec![b'x'; 40_000])],
        };
        let encoded = records.encode();
        assert_eq!(&encoded[3..5], &[0x80, 0x04]);
        assert_eq!(IptcRecords::parse(&encoded).unwrap(), records);
    }

    #[test]
    fn truncated_records_are_rejected() {
        let mut records = IptcRecords::default();
        records.set_description("title", &keywords(&["one"]));
        let encoded = records.encode();
        assert!(IptcRecords::parse(&encoded[..encoded.len() - 2]).is_none());
    }

    #[test]
    fn app13_rewrite_keeps_other_resources() {
        let other = ImageResource {
            id: 0x03ED,
            name: vec![0, 0],
            data: vec![1, 2, 3],
        };
        let mut existing = PHOTOSHOP_SIGNATURE.to_vec();
        existing.extend(encode_resources(&[other.clone()]));

        let payload = rewrite_app13(Some(existing.as_slice()), |records| {
            records.set_description("t", &keywords(&["k"]))
        });
        let resources =
            parse_resources(payload.strip_prefix(PHOTOSHOP_SIGNATURE).unwrap()).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0], other);
        let iptc = IptcRecords::parse(&resources[1].data).unwrap();
        assert_eq!(iptc.keywords(), ["k"]);
    }

    #[test]
    fn png_profile_hex_round_trips() {
        let mut records = IptcRecords::default();
        records.set_description("Harbour", &keywords(&["boats", "pier", "sunset"]));
        let iim = records.encode();

        let text = encode_png_profile(&iim);
        assert!(text.starts_with("\niptc\n"));
        assert_eq!(decode_png_profile(&text).unwrap(), iim);
    }
}
