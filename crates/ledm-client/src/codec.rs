//! XML codec for LEDM scan documents
//!
//! Outgoing bodies are rendered from fixed templates. Incoming bodies are
//! parsed into a small element tree and fields are looked up by local name
//! (namespace prefixes are ignored), so unrelated elements added by newer
//! firmware are simply skipped.

use std::str::FromStr;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Result, ScanError};
use crate::types::*;

/// Namespace of scan-job and scan-status documents
pub const SCAN_NAMESPACE: &str = "http://www.hp.com/schemas/imaging/con/cnx/scan/2008/08/19";
/// Namespace of job-management documents
pub const JOBS_NAMESPACE: &str = "http://www.hp.com/schemas/imaging/con/ledm/jobs/2009/04/30";

const DICTIONARIES_NAMESPACE: &str = "http://www.hp.com/schemas/imaging/con/dictionaries/1.0/";
const FIREWALL_NAMESPACE: &str = "http://www.hp.com/schemas/imaging/con/firewall/2011/01/05";

// =============================================================================
// Element Tree
// =============================================================================

/// An element with its local name, concatenated text and children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    text: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// Local name (without namespace prefix)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Text content directly inside this element
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    /// First descendant with the given local name, in document order
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// Text of the first descendant named `name`; missing element is an error
    pub fn required_text(&self, name: &str) -> Result<&str> {
        self.find(name)
            .map(|e| e.text())
            .ok_or_else(|| ScanError::missing_element(name))
    }

    /// Parse the text of the first descendant named `name`
    pub fn required_value<T: FromStr>(&self, name: &str) -> Result<T> {
        let text = self.required_text(name)?;
        text.parse().map_err(|_| {
            ScanError::MalformedResponse(format!("invalid <{}> value: {:?}", name, text))
        })
    }
}

/// A parsed XML document
///
/// The document node itself is unnamed; its single child is the root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    document: XmlElement,
}

impl XmlDocument {
    /// Parse a response body
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        // Open elements, innermost last; index 0 is the document node
        let mut stack = vec![XmlElement::default()];

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    stack.push(XmlElement::new(name));
                }
                Event::Empty(start) => {
                    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    append_child(&mut stack, XmlElement::new(name));
                }
                Event::End(_) => {
                    if stack.len() < 2 {
                        return Err(ScanError::MalformedResponse(
                            "unbalanced end tag".to_string(),
                        ));
                    }
                    if let Some(element) = stack.pop() {
                        append_child(&mut stack, element);
                    }
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(|e| {
                        ScanError::MalformedResponse(format!("invalid XML text: {}", e))
                    })?;
                    append_text(&mut stack, &text);
                }
                Event::CData(data) => {
                    let data = data.into_inner();
                    append_text(&mut stack, &String::from_utf8_lossy(&data));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if stack.len() != 1 {
            return Err(ScanError::MalformedResponse(
                "unexpected end of document".to_string(),
            ));
        }
        let document = stack.pop().unwrap_or_default();
        if document.children.is_empty() {
            return Err(ScanError::MalformedResponse("empty document".to_string()));
        }

        Ok(Self { document })
    }

    /// The root element
    pub fn root(&self) -> Option<&XmlElement> {
        self.document.children.first()
    }

    /// First element anywhere in the document with the given local name
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        self.document.find(name)
    }

    pub fn required_text(&self, name: &str) -> Result<&str> {
        self.document.required_text(name)
    }

    pub fn required_value<T: FromStr>(&self, name: &str) -> Result<T> {
        self.document.required_value(name)
    }
}

fn append_child(stack: &mut [XmlElement], element: XmlElement) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    }
}

fn append_text(stack: &mut [XmlElement], text: &str) {
    if let Some(current) = stack.last_mut() {
        current.text.push_str(text);
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Render the scan-job document posted to `/Scan/Jobs`
pub fn encode_scan_job(request: &ScanRequest) -> String {
    format!(
        r#"<?xml version="1.0"?>
<scan:ScanJob xmlns:scan="{scan_ns}" xmlns:dd="{dd_ns}" xmlns:fw="{fw_ns}">
  <scan:XResolution>{x_resolution}</scan:XResolution>
  <scan:YResolution>{y_resolution}</scan:YResolution>
  <scan:XStart>{x_start}</scan:XStart>
  <scan:YStart>{y_start}</scan:YStart>
  <scan:Width>{width}</scan:Width>
  <scan:Height>{height}</scan:Height>
  <scan:Format>{format}</scan:Format>
  <scan:CompressionQFactor>{qfactor}</scan:CompressionQFactor>
  <scan:ColorSpace>{color_space}</scan:ColorSpace>
  <scan:BitDepth>{bit_depth}</scan:BitDepth>
  <scan:InputSource>{input_source}</scan:InputSource>
  <scan:GrayRendering>{gray_rendering}</scan:GrayRendering>
  <scan:ToneMap>
    <scan:Gamma>{gamma}</scan:Gamma>
    <scan:Brightness>{brightness}</scan:Brightness>
    <scan:Contrast>{contrast}</scan:Contrast>
    <scan:Highlite>{highlite}</scan:Highlite>
    <scan:Shadow>{shadow}</scan:Shadow>
  </scan:ToneMap>
  <scan:ContentType>{content_type}</scan:ContentType>
</scan:ScanJob>"#,
        scan_ns = SCAN_NAMESPACE,
        dd_ns = DICTIONARIES_NAMESPACE,
        fw_ns = FIREWALL_NAMESPACE,
        x_resolution = request.x_resolution,
        y_resolution = request.y_resolution,
        x_start = request.x_start,
        y_start = request.y_start,
        width = request.width,
        height = request.height,
        format = escape(request.format.as_str()),
        qfactor = request.compression_qfactor,
        color_space = escape(request.color_space.as_str()),
        bit_depth = request.bit_depth,
        input_source = escape(request.input_source.as_str()),
        gray_rendering = escape(request.gray_rendering.as_str()),
        gamma = request.tone_map.gamma,
        brightness = request.tone_map.brightness,
        contrast = request.tone_map.contrast,
        highlite = request.tone_map.highlite,
        shadow = request.tone_map.shadow,
        content_type = escape(request.content_type.as_str()),
    )
}

/// Render the job document that asks the device to cancel `job`
pub fn encode_cancel(job: &JobHandle) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Job xmlns="{jobs_ns}" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:schemaLocation="{jobs_ns} Jobs.xsd">
<JobUrl>{job_url}</JobUrl>
<JobState>Canceled</JobState>
</Job>"#,
        jobs_ns = JOBS_NAMESPACE,
        job_url = escape(job.as_str()),
    )
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode the body of `GET /Scan/Status`
pub fn decode_scanner_state(xml: &str) -> Result<ScannerState> {
    let doc = XmlDocument::parse(xml)?;
    Ok(ScannerState::from(doc.required_text("ScannerState")?))
}

/// Decode the body of `GET <job-url>`
///
/// A `PreScanPage` record wins over a `PostScanPage` one.
pub fn decode_job_status(xml: &str) -> Result<JobStatus> {
    let doc = XmlDocument::parse(xml)?;
    let state = JobState::from(doc.required_text("JobState")?);

    let page = if let Some(element) = doc.find("PreScanPage") {
        Some(PageRecord::PreScan(decode_page_fields(element)?))
    } else if let Some(element) = doc.find("PostScanPage") {
        Some(PageRecord::PostScan(decode_page_fields(element)?))
    } else {
        None
    };

    Ok(JobStatus { state, page })
}

/// Extract the fields common to both page record kinds
///
/// Image fields are copied as text; [`PageFields::ready_image`] validates
/// them once the job is known to be processing.
pub fn decode_page_fields(page: &XmlElement) -> Result<PageFields> {
    let text = |name: &str| page.find(name).map(|e| e.text().to_string());
    Ok(PageFields {
        state: PageState::from(page.required_text("PageState")?),
        image_width: text("ImageWidth"),
        image_height: text("ImageHeight"),
        binary_url: text("BinaryURL"),
    })
}

/// Decode a scan-job document back into a request
pub fn decode_scan_job(xml: &str) -> Result<ScanRequest> {
    let doc = XmlDocument::parse(xml)?;
    Ok(ScanRequest {
        x_resolution: doc.required_value("XResolution")?,
        y_resolution: doc.required_value("YResolution")?,
        x_start: doc.required_value("XStart")?,
        y_start: doc.required_value("YStart")?,
        width: doc.required_value("Width")?,
        height: doc.required_value("Height")?,
        format: doc.required_text("Format")?.to_string(),
        compression_qfactor: doc.required_value("CompressionQFactor")?,
        color_space: doc.required_text("ColorSpace")?.to_string(),
        bit_depth: doc.required_value("BitDepth")?,
        input_source: doc.required_text("InputSource")?.to_string(),
        gray_rendering: doc.required_text("GrayRendering")?.to_string(),
        tone_map: ToneMap {
            gamma: doc.required_value("Gamma")?,
            brightness: doc.required_value("Brightness")?,
            contrast: doc.required_value("Contrast")?,
            highlite: doc.required_value("Highlite")?,
            shadow: doc.required_value("Shadow")?,
        },
        content_type: doc.required_text("ContentType")?.to_string(),
    })
}

/// Decode a cancel document, returning the job it targets
pub fn decode_cancel(xml: &str) -> Result<JobHandle> {
    let doc = XmlDocument::parse(xml)?;
    Ok(JobHandle::new(doc.required_text("JobUrl")?))
}
