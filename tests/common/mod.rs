//! Synthetic archive builder shared by the integration tests.

#![allow(dead_code)]

pub const STORED: u16 = 0;
pub const DEFLATED: u16 = 8;

pub const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// Builds a minimal single-disk ZIP archive in memory.
#[derive(Default)]
pub struct ZipBuilder {
    data: Vec<u8>,
    central: Vec<u8>,
    count: u16,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(self, name: &str, content: &[u8]) -> Self {
        self.entry(name, content, STORED)
    }

    pub fn deflated(self, name: &str, content: &[u8]) -> Self {
        self.entry(name, content, DEFLATED)
    }

    /// Add an entry. Method 8 is raw-deflated, every other method id stores
    /// the bytes verbatim.
    pub fn entry(mut self, name: &str, content: &[u8], method: u16) -> Self {
        let payload = if method == DEFLATED {
            miniz_oxide::deflate::compress_to_vec(content, 6)
        } else {
            content.to_vec()
        };
        let crc = crc32fast::hash(content);
        let name = name.as_bytes();
        let local_offset = self.data.len() as u32;

        let d = &mut self.data;
        d.extend_from_slice(&0x04034b50u32.to_le_bytes());
        d.extend_from_slice(&20u16.to_le_bytes());
        d.extend_from_slice(&0u16.to_le_bytes());
        d.extend_from_slice(&method.to_le_bytes());
        d.extend_from_slice(&0u32.to_le_bytes());
        d.extend_from_slice(&crc.to_le_bytes());
        d.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        d.extend_from_slice(&(content.len() as u32).to_le_bytes());
        d.extend_from_slice(&(name.len() as u16).to_le_bytes());
        d.extend_from_slice(&0u16.to_le_bytes());
        d.extend_from_slice(name);
        d.extend_from_slice(&payload);

        let c = &mut self.central;
        c.extend_from_slice(&0x02014b50u32.to_le_bytes());
        c.extend_from_slice(&20u16.to_le_bytes());
        c.extend_from_slice(&20u16.to_le_bytes());
        c.extend_from_slice(&0u16.to_le_bytes());
        c.extend_from_slice(&method.to_le_bytes());
        c.extend_from_slice(&0u32.to_le_bytes());
        c.extend_from_slice(&crc.to_le_bytes());
        c.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        c.extend_from_slice(&(content.len() as u32).to_le_bytes());
        c.extend_from_slice(&(name.len() as u16).to_le_bytes());
        c.extend_from_slice(&0u16.to_le_bytes());
        c.extend_from_slice(&0u16.to_le_bytes());
        c.extend_from_slice(&0u16.to_le_bytes());
        c.extend_from_slice(&0u16.to_le_bytes());
        c.extend_from_slice(&0u32.to_le_bytes());
        c.extend_from_slice(&local_offset.to_le_bytes());
        c.extend_from_slice(name);

        self.count += 1;
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        let cd_offset = self.data.len() as u32;
        let cd_size = self.central.len() as u32;
        self.data.extend_from_slice(&self.central);

        let d = &mut self.data;
        d.extend_from_slice(&0x06054b50u32.to_le_bytes());
        d.extend_from_slice(&0u16.to_le_bytes());
        d.extend_from_slice(&0u16.to_le_bytes());
        d.extend_from_slice(&self.count.to_le_bytes());
        d.extend_from_slice(&self.count.to_le_bytes());
        d.extend_from_slice(&cd_size.to_le_bytes());
        d.extend_from_slice(&cd_offset.to_le_bytes());
        d.extend_from_slice(&0u16.to_le_bytes());
        self.data
    }
}

/// Package document with one manifest item and spine entry per chapter href.
pub fn opf(chapters: &[&str]) -> String {
    let mut manifest = String::new();
    let mut spine = String::new();
    for (i, href) in chapters.iter().enumerate() {
        manifest.push_str(&format!(
            r#"<item id="c{}" href="{}" media-type="application/xhtml+xml"/>"#,
            i, href
        ));
        spine.push_str(&format!(r#"<itemref idref="c{}"/>"#, i));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
<metadata/><manifest>{}</manifest><spine>{}</spine></package>"#,
        manifest, spine
    )
}

pub fn xhtml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>Chapter</title></head>
<body>{}</body></html>"#,
        body
    )
}
