use super::Attributes;

/// Property names that carry child content and are never serialized as attributes.
pub const RESERVED_PROPS: [&str; 2] = ["children", "nodeValue"];

/// Maps an internal lowercase-hyphenated tag name (`segment-template`) to the
/// MPD spelling (`SegmentTemplate`).
pub fn normalize_tag(tag: &str) -> String {
    match tag {
        "mpd" => "MPD".to_string(),
        "base-url" => "BaseURL".to_string(),
        _ => tag
            .split('-')
            .map(|section| {
                let mut chars = section.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect(),
    }
}

/// Attributes that take part in the output, in insertion order, rendered to text.
pub fn emitted_attributes(attributes: &Attributes) -> Vec<(String, String)> {
    attributes
        .iter()
        .filter(|(name, _)| !RESERVED_PROPS.contains(name))
        .filter_map(|(name, value)| value.render().map(|value| (name.to_string(), value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;

    #[test]
    fn special_cased_tags() {
        assert_eq!(normalize_tag("mpd"), "MPD");
        assert_eq!(normalize_tag("base-url"), "BaseURL");
    }

    #[test]
    fn general_rule_capitalizes_and_joins() {
        assert_eq!(normalize_tag("segment-template"), "SegmentTemplate");
        assert_eq!(normalize_tag("audio-channel-configuration"), "AudioChannelConfiguration");
        assert_eq!(normalize_tag("period"), "Period");
        assert_eq!(normalize_tag("s"), "S");
    }

    #[test]
    fn absent_and_reserved_attributes_are_skipped() {
        let attributes = attrs! {
            "id" => 137u32,
            "frameRate" => None::<u32>,
            "children" => "ignored",
            "nodeValue" => "ignored",
            "maxPlayoutRate" => "1",
            "subsegmentAlignment" => true,
        };

        assert_eq!(
            emitted_attributes(&attributes),
            vec![
                ("id".to_string(), "137".to_string()),
                ("maxPlayoutRate".to_string(), "1".to_string()),
                ("subsegmentAlignment".to_string(), "true".to_string()),
            ]
        );
    }
}
