use crate::entry::{Accessory, Board, Boom, EntryKind, FullSet, Mast, Sail, Variant};
use crate::listing::Listing;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

const EXAMPLE_TITLE: &str = "North Spectro 6.5 Surfsegel Windsurfen";
const EXAMPLE_DESCRIPTION: &str = "Segel mit wenigen Gebrauchsspuren. 2 Band-Camber als Profilgeber. \
Ein kleiner getapteter Cut im Unterliek. gerne auch mit Carbonmast + 20€";
const EXAMPLE_ANSWER: &str = r#"{
  "type": "sail",
  "size": "6.5",
  "brand": "North Spectro",
  "mast_length": "4.92",
  "boom_size": "1.95",
  "year": "N/A",
  "state": "repaired"
}"#;

/// One chat message as the chat completions API expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: &'static str,
}

impl ChatMessage {
    fn system(text: String) -> Self {
        Self {
            role: "system",
            content: MessageContent::Text(text),
        }
    }

    fn assistant(text: &str) -> Self {
        Self {
            role: "assistant",
            content: MessageContent::Text(text.to_string()),
        }
    }

    fn user(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user",
            content: MessageContent::Parts(parts),
        }
    }
}

impl ContentPart {
    fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// An inline image. `base64` is the encoded JPEG/PNG payload.
    fn image(base64: &str) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/png;base64,{}", base64),
                detail: "low",
            },
        }
    }
}

/// The `PromptBuilder` struct constructs the extraction conversation for one listing.
///
/// The conversation is a system message describing every equipment type, one worked example
/// exchange, and the listing itself with its images.
pub struct PromptBuilder {
    /// The listing title.
    title: String,
    /// The listing description.
    description: String,
    /// Base64 encoded listing images.
    images: Vec<String>,
    /// Base64 encoded image shown with the worked example.
    example_image: Option<String>,
}

impl PromptBuilder {
    /// Creates a new `PromptBuilder` for the given listing.
    ///
    /// # Arguments
    ///
    /// * `listing` - The listing to classify.
    ///
    /// # Returns
    ///
    /// A new instance of `PromptBuilder` without images.
    pub fn new(listing: &Listing) -> Self {
        Self {
            title: listing.title.clone(),
            description: listing.description.clone(),
            images: Vec::new(),
            example_image: None,
        }
    }

    /// Adds the base64 encoded listing images.
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// Adds the base64 encoded image of the worked example.
    pub fn with_example_image(mut self, image: Option<String>) -> Self {
        self.example_image = image;
        self
    }

    /// Builds the chat messages.
    pub fn build(&self) -> Vec<ChatMessage> {
        let mut example = vec![ContentPart::text(format!(
            "As an example, let's extract the details of the following offer:\n---\n\n{}",
            offer_text(EXAMPLE_TITLE, EXAMPLE_DESCRIPTION)
        ))];
        if let Some(image) = &self.example_image {
            example.push(ContentPart::image(image));
        }

        let mut request = vec![ContentPart::text(offer_text(&self.title, &self.description))];
        request.extend(self.images.iter().map(|image| ContentPart::image(image)));

        vec![
            ChatMessage::system(system_prompt()),
            ChatMessage::user(example),
            ChatMessage::assistant(EXAMPLE_ANSWER),
            ChatMessage::user(request),
        ]
    }

    /// Builds the go/no-go question for a classified listing.
    ///
    /// # Arguments
    ///
    /// * `listing` - The listing to judge.
    /// * `criteria` - Free-text description of what the user is looking for.
    pub fn judge(listing: &Listing, criteria: &str) -> Vec<ChatMessage> {
        let system = format!(
            "You are a helpful assistant that decides whether an offer for Windsurf equipment \
matches what a buyer is looking for. The buyer is looking for:\n\n{}\n\n\
Answer only with JSON in the form {{\"interesting\": true}} or {{\"interesting\": false}}.",
            criteria.trim()
        );
        let offer = format!(
            "{}\nPrice: {}\nLocation: {}",
            offer_text(&listing.title, &listing.description),
            listing.price,
            listing.location
        );
        vec![ChatMessage::system(system), ChatMessage::user(vec![ContentPart::text(offer)])]
    }

    /// Cleans the given text by removing blank lines and normalizing whitespace.
    ///
    /// # Arguments
    ///
    /// * `text` - The text to be cleaned.
    ///
    /// # Returns
    ///
    /// The cleaned text.
    fn clean_text(text: &str) -> String {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.split_whitespace().collect::<Vec<&str>>().join(" "))
            .collect::<Vec<String>>()
            .join("\n")
    }
}

fn offer_text(title: &str, description: &str) -> String {
    format!(
        "Convert the following offer into the appropriate JSON format:\n\nTitle: {}\nDescription: {}",
        PromptBuilder::clean_text(title),
        PromptBuilder::clean_text(description)
    )
}

/// JSON shape of a flat variant: `type` followed by each field with its description.
fn json_shape<V: Variant>() -> IndexMap<&'static str, Value> {
    let mut shape = IndexMap::new();
    shape.insert("type", Value::from(V::KIND.as_str()));
    for spec in V::FIELDS {
        shape.insert(spec.name, Value::from(spec.description));
    }
    shape
}

fn full_rig_shape() -> IndexMap<&'static str, Value> {
    let nested = |shape: IndexMap<&'static str, Value>| {
        serde_json::to_value(shape).unwrap_or(Value::Null)
    };
    let mut shape = IndexMap::new();
    shape.insert("type", Value::from(EntryKind::FullRig.as_str()));
    shape.insert("sail", nested(json_shape::<Sail>()));
    shape.insert("mast", nested(json_shape::<Mast>()));
    shape.insert("boom", nested(json_shape::<Boom>()));
    shape
}

/// The system message, generated from the declared field tables.
pub fn system_prompt() -> String {
    let shapes: Vec<(EntryKind, IndexMap<&'static str, Value>)> = vec![
        (EntryKind::Sail, json_shape::<Sail>()),
        (EntryKind::Board, json_shape::<Board>()),
        (EntryKind::Mast, json_shape::<Mast>()),
        (EntryKind::Boom, json_shape::<Boom>()),
        (EntryKind::FullSet, json_shape::<FullSet>()),
        (EntryKind::FullRig, full_rig_shape()),
        (EntryKind::Accessory, json_shape::<Accessory>()),
    ];

    let names: Vec<&str> = EntryKind::EQUIPMENT.iter().map(|k| k.display_name()).collect();
    let (last, rest): (&str, &[&str]) = match names.split_last() {
        Some((last, rest)) => (*last, rest),
        None => ("", &[]),
    };

    let mut descriptions = String::new();
    for (kind, shape) in shapes {
        let json = serde_json::to_string_pretty(&shape).unwrap_or_default();
        descriptions.push_str(&format!("{}:\n```json\n{}\n```\n\n", kind.display_name(), json));
    }

    format!(
        "You are a helpful assistant that extracts information from offers related to Windsurf \
equipment and converts it into a specific JSON format. The types of equipment include {} and {}.\n\n\
If the information is not available or cannot be determined from the input, use \"\".\n\n\
You should output the information in the following JSON format based on the type of equipment:\n\n\
{}\
If the type of equipment cannot be determined or is not relevant to usable windsurf equipment, use:\n\
```json\n{{\n  \"type\": \"N/A\"\n}}\n```\n\
This will be for items like child equipment, courses, toys, display figures, etc. which are not \
relevant to windsurfing.",
        rest.join(", "),
        last,
        descriptions
    )
}
