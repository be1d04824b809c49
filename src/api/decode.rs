//! XML decoding for post-index responses.
//!
//! Two response layouts are accepted: the legacy one, where every `post`
//! element carries its fields as attributes, and the current one, where each
//! field is a child element. The root element carries the total `count`.

use crate::api::error::ApiError;
use crate::api::post::{Post, PostPage};
use anyhow::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const POST_ELEMENT: &[u8] = b"post";
const ERROR_ROOT: &[u8] = b"response";

/// Decodes one response body into the total count and its posts.
pub fn decode_page(body: &[u8]) -> Result<PostPage> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut page = PostPage::default();
    let mut saw_root = false;
    let mut current: Option<PostFields> = None;
    let mut field: Option<String> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| ApiError::decode(format!("malformed XML: {err}")))?;

        match event {
            Event::Start(ref start) | Event::Empty(ref start) => {
                let is_empty = matches!(event, Event::Empty(_));
                if !saw_root {
                    saw_root = true;
                    page.count = read_root(start)?;
                } else if start.name().as_ref() == POST_ELEMENT {
                    let fields = PostFields::from_attributes(start)?;
                    if is_empty {
                        page.posts.push(fields.finish()?);
                    } else {
                        current = Some(fields);
                    }
                } else if current.is_some() && !is_empty {
                    field = Some(String::from_utf8_lossy(start.name().as_ref()).into_owned());
                }
            }
            Event::Text(text) => {
                if let (Some(fields), Some(name)) = (current.as_mut(), field.as_deref()) {
                    let value = text
                        .unescape()
                        .map_err(|err| ApiError::decode(format!("invalid text in {name}: {err}")))?;
                    fields.set(name, &value)?;
                }
            }
            Event::CData(data) => {
                if let (Some(fields), Some(name)) = (current.as_mut(), field.as_deref()) {
                    fields.set(name, &String::from_utf8_lossy(&data))?;
                }
            }
            Event::End(end) => {
                if end.name().as_ref() == POST_ELEMENT {
                    if let Some(fields) = current.take() {
                        page.posts.push(fields.finish()?);
                    }
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(ApiError::decode("response has no root element").into());
    }

    Ok(page)
}

fn read_root(start: &BytesStart<'_>) -> Result<Option<u64>> {
    let mut count = None;
    let mut success = None;
    let mut reason = None;

    for attr in start.attributes() {
        let attr = attr.map_err(|err| ApiError::decode(format!("invalid root attribute: {err}")))?;
        let value = attr
            .unescape_value()
            .map_err(|err| ApiError::decode(format!("invalid root attribute value: {err}")))?;
        match attr.key.as_ref() {
            b"count" => {
                let parsed = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ApiError::decode(format!("invalid count attribute '{value}'")))?;
                count = Some(parsed);
            }
            b"success" => success = Some(value.into_owned()),
            b"reason" => reason = Some(value.into_owned()),
            _ => {}
        }
    }

    if start.name().as_ref() == ERROR_ROOT && success.as_deref() == Some("false") {
        let reason = reason.unwrap_or_else(|| "unspecified".to_string());
        return Err(ApiError::decode(format!("API rejected request: {reason}")).into());
    }

    Ok(count)
}

#[derive(Default)]
struct PostFields {
    post: Post,
    id: Option<u64>,
}

impl PostFields {
    fn from_attributes(start: &BytesStart<'_>) -> Result<Self> {
        let mut fields = Self::default();
        for attr in start.attributes() {
            let attr =
                attr.map_err(|err| ApiError::decode(format!("invalid post attribute: {err}")))?;
            let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| ApiError::decode(format!("invalid value for {name}: {err}")))?;
            fields.set(&name, &value)?;
        }
        Ok(fields)
    }

    fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let post = &mut self.post;
        match name {
            "id" => self.id = Some(parse_number(name, value)?),
            "width" => post.width = parse_number(name, value)?,
            "height" => post.height = parse_number(name, value)?,
            "score" => post.score = parse_number(name, value)?,
            "creator_id" => post.creator_id = parse_number(name, value)?,
            "source" => post.source = value.to_owned(),
            "preview_url" => post.preview_url = absolute_url(value),
            "sample_url" => post.sample_url = absolute_url(value),
            "file_url" => post.file_url = absolute_url(value),
            "created_at" => post.created_at = value.to_owned(),
            "tags" => post.tags = Post::split_tags(value),
            "rating" => post.rating = value.to_owned(),
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<Post> {
        let id = self
            .id
            .ok_or_else(|| ApiError::decode("post element is missing its id"))?;
        Ok(Post { id, ..self.post })
    }
}

fn parse_number<T: std::str::FromStr + Default>(name: &str, value: &str) -> Result<T> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(T::default());
    }
    trimmed
        .parse::<T>()
        .map_err(|_| ApiError::decode(format!("invalid {name} value '{value}'")).into())
}

/// Upstream URLs may be protocol-relative (`//host/path`).
fn absolute_url(value: &str) -> String {
    let value = value.trim();
    if value.starts_with("//") {
        format!("https:{value}")
    } else {
        value.to_owned()
    }
}
