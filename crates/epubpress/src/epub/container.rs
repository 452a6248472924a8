//! Zip-level checks that run before the package is parsed: rights
//! management, encryption and entry sizes. Also the bounded entry reads
//! every content document and image goes through.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::entities;
use crate::error::ConversionError;

pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";
pub const RIGHTS_PATH: &str = "META-INF/rights.xml";

/// Encryption algorithms that only obfuscate embedded fonts. Content
/// encrypted with anything else is treated as DRM.
const FONT_OBFUSCATION_ALGORITHMS: &[&str] = &[
    "http://www.idpf.org/2008/embedding",
    "http://ns.adobe.com/pdf/enc#RC",
];

pub struct EpubArchive<R> {
    zip: ZipArchive<R>,
    max_entry_bytes: u64,
}

impl EpubArchive<BufReader<File>> {
    pub fn open(path: &Path, max_entry_bytes: u64) -> Result<Self, ConversionError> {
        let file = File::open(path).map_err(|e| {
            ConversionError::malformed(format!("cannot open '{}': {}", path.display(), e))
        })?;
        Self::from_reader(BufReader::new(file), max_entry_bytes)
    }
}

impl<R: Read + Seek> EpubArchive<R> {
    pub fn from_reader(reader: R, max_entry_bytes: u64) -> Result<Self, ConversionError> {
        let zip = ZipArchive::new(reader)
            .map_err(|e| ConversionError::malformed(format!("not a zip container: {}", e)))?;
        Ok(Self {
            zip,
            max_entry_bytes,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.zip.file_names().any(|entry| entry == name)
    }

    /// Reads an entry fully, returning `None` when it does not exist.
    pub fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>, ConversionError> {
        let entry = match self.zip.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) if is_password_error(&e) => {
                return Err(ConversionError::UnsupportedProtection(format!(
                    "entry '{}' is password protected",
                    name
                )));
            }
            Err(e) => {
                return Err(ConversionError::malformed(format!(
                    "cannot read entry '{}': {}",
                    name, e
                )));
            }
        };

        let mut data = Vec::new();
        entry
            .take(self.max_entry_bytes + 1)
            .read_to_end(&mut data)
            .map_err(|e| {
                ConversionError::malformed(format!("corrupt entry '{}': {}", name, e))
            })?;

        if data.len() as u64 > self.max_entry_bytes {
            return Err(ConversionError::malformed(format!(
                "entry '{}' exceeds the size limit of {} bytes",
                name, self.max_entry_bytes
            )));
        }

        Ok(Some(data))
    }

    /// Fails with `UnsupportedProtection` when the book carries rights
    /// management or encrypts anything beyond obfuscated fonts.
    pub fn check_protection(&mut self) -> Result<(), ConversionError> {
        if self.contains(RIGHTS_PATH) {
            return Err(ConversionError::UnsupportedProtection(format!(
                "rights management file '{}' present",
                RIGHTS_PATH
            )));
        }

        let Some(xml) = self.read(ENCRYPTION_PATH)? else {
            return Ok(());
        };

        let encrypted: Vec<EncryptedEntry> = parse_encryption(&xml)?
            .into_iter()
            .filter(|entry| !FONT_OBFUSCATION_ALGORITHMS.contains(&entry.algorithm.as_str()))
            .collect();

        match encrypted.first() {
            Some(first) => Err(ConversionError::UnsupportedProtection(format!(
                "{} encrypted resource(s), first '{}'",
                encrypted.len(),
                first.uri
            ))),
            None => Ok(()),
        }
    }

    /// Fails when `container.xml` or a package document declares more
    /// bytes than the entry limit. The package parser reads those entries
    /// whole, so they are checked before it runs.
    pub fn check_package_sizes(&mut self) -> Result<(), ConversionError> {
        for index in 0..self.zip.len() {
            let entry = self.zip.by_index_raw(index).map_err(|e| {
                ConversionError::malformed(format!("cannot read entry {}: {}", index, e))
            })?;
            let name = entry.name();
            let is_package = name == CONTAINER_PATH || name.to_ascii_lowercase().ends_with(".opf");
            if is_package && entry.size() > self.max_entry_bytes {
                return Err(ConversionError::malformed(format!(
                    "entry '{}' exceeds the size limit of {} bytes",
                    name, self.max_entry_bytes
                )));
            }
        }
        Ok(())
    }
}

fn is_password_error(error: &ZipError) -> bool {
    error.to_string().to_ascii_lowercase().contains("password")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEntry {
    pub uri: String,
    pub algorithm: String,
}

pub fn parse_encryption(xml: &[u8]) -> Result<Vec<EncryptedEntry>, ConversionError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut algorithm = String::new();
    let mut entries = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"EncryptionMethod" => {
                    algorithm = attribute(e, b"Algorithm").unwrap_or_default();
                }
                b"CipherReference" => {
                    if let Some(uri) = attribute(e, b"URI") {
                        entries.push(EncryptedEntry {
                            uri,
                            algorithm: algorithm.clone(),
                        });
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"EncryptedData" => {
                algorithm.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ConversionError::malformed(format!(
                    "{} is not well-formed: {}",
                    ENCRYPTION_PATH, e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// Decoded value of the attribute whose local name is `name`, ignoring
/// namespace prefixes.
fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .with_checks(false)
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name)
        .map(|attr| entities::decode(&String::from_utf8_lossy(&attr.value)).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;

    fn zip_with(entries: &[(&str, &[u8])]) -> Cursor<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    #[test]
    fn test_font_obfuscation_is_not_drm() {
        let encryption = br#"<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container"
              xmlns:enc="http://www.w3.org/2001/04/xmlenc#">
            <enc:EncryptedData>
              <enc:EncryptionMethod Algorithm="http://www.idpf.org/2008/embedding"/>
              <enc:CipherData><enc:CipherReference URI="OEBPS/fonts/a.otf"/></enc:CipherData>
            </enc:EncryptedData>
          </encryption>"#;
        let mut archive =
            EpubArchive::from_reader(zip_with(&[(ENCRYPTION_PATH, encryption)]), 1024 * 1024)
                .unwrap();
        assert!(archive.check_protection().is_ok());
    }

    #[test]
    fn test_encrypted_content_is_drm() {
        let encryption = br#"<encryption xmlns:enc="http://www.w3.org/2001/04/xmlenc#">
            <enc:EncryptedData>
              <enc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
              <enc:CipherData><enc:CipherReference URI="OEBPS/ch1.xhtml"/></enc:CipherData>
            </enc:EncryptedData>
          </encryption>"#;
        let mut archive =
            EpubArchive::from_reader(zip_with(&[(ENCRYPTION_PATH, encryption)]), 1024 * 1024)
                .unwrap();
        let err = archive.check_protection().unwrap_err();
        assert!(matches!(err, ConversionError::UnsupportedProtection(_)));
        assert!(err.to_string().contains("OEBPS/ch1.xhtml"));
    }

    #[test]
    fn test_rights_file_is_drm() {
        let mut archive =
            EpubArchive::from_reader(zip_with(&[(RIGHTS_PATH, b"<rights/>")]), 1024).unwrap();
        assert!(matches!(
            archive.check_protection(),
            Err(ConversionError::UnsupportedProtection(_))
        ));
    }

    #[test]
    fn test_read_enforces_size_limit() {
        let mut archive =
            EpubArchive::from_reader(zip_with(&[("big.bin", &[7u8; 64])]), 16).unwrap();
        assert!(matches!(
            archive.read("big.bin"),
            Err(ConversionError::MalformedInput(_))
        ));
        assert!(archive.read("missing.bin").unwrap().is_none());
    }

    #[test]
    fn test_oversized_package_document_is_rejected() {
        let opf = vec![b' '; 64];
        let mut archive = EpubArchive::from_reader(
            zip_with(&[("OEBPS/content.opf", &opf), ("OEBPS/big.png", &[7u8; 64])]),
            32,
        )
        .unwrap();
        let err = archive.check_package_sizes().unwrap_err();
        assert!(err.to_string().contains("content.opf"));

        // Large non-package entries are left to the bounded reads.
        let mut archive =
            EpubArchive::from_reader(zip_with(&[("OEBPS/big.png", &[7u8; 64])]), 32).unwrap();
        assert!(archive.check_package_sizes().is_ok());
    }

    #[test]
    fn test_non_zip_is_malformed() {
        let result = EpubArchive::from_reader(Cursor::new(Vec::new()), 1024);
        assert!(matches!(result, Err(ConversionError::MalformedInput(_))));
    }
}
