//! PDF merge and split adapters
//!
//! The pipeline consolidates heterogeneous payload documents into one PDF
//! and later splits it into per-page PDFs with stable ordering and
//! per-page SHA-256 hashes. PDF-native inputs are concatenated; plain-text
//! inputs are rendered onto simple pages first. MIME matching is
//! case-insensitive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Unsupported document type: {0}")]
    UnsupportedMime(String),

    #[error("Malformed PDF: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One input to the merger.
#[derive(Debug, Clone)]
pub struct MergeInput {
    pub local_path: PathBuf,
    pub mime_type: String,
}

/// One page produced by the splitter.
#[derive(Debug, Clone)]
pub struct SplitPage {
    /// 1-indexed, in document order.
    pub page_number: i32,
    pub local_path: PathBuf,
    pub content_type: String,
    pub size_bytes: u64,
    pub sha256: String,
}

pub trait PdfMerger: Send + Sync {
    /// Concatenate inputs, in order, into a single PDF. Returns the total
    /// page count.
    fn merge(&self, inputs: &[MergeInput], output: &Path) -> Result<usize, PdfError>;
}

pub trait PdfSplitter: Send + Sync {
    /// Split a PDF into per-page PDFs under `output_dir`.
    fn split(&self, input: &Path, output_dir: &Path) -> Result<Vec<SplitPage>, PdfError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfMerger;

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfSplitter;

impl PdfMerger for LopdfMerger {
    fn merge(&self, inputs: &[MergeInput], output: &Path) -> Result<usize, PdfError> {
        if inputs.is_empty() {
            return Err(PdfError::Malformed("no documents to merge".into()));
        }

        let mut loaded = Vec::with_capacity(inputs.len());
        for input in inputs {
            let mime = input.mime_type.trim().to_lowercase();
            let doc = if mime == "application/pdf" {
                Document::load(&input.local_path)?
            } else if mime == "text/plain" || mime.starts_with("text/") {
                let text = std::fs::read_to_string(&input.local_path)?;
                text_to_document(&text)
            } else {
                return Err(PdfError::UnsupportedMime(input.mime_type.clone()));
            };
            loaded.push(doc);
        }

        let page_count = merge_documents(loaded, output)?;
        tracing::info!(
            inputs = inputs.len(),
            pages = page_count,
            output = %output.display(),
            "Merged documents into consolidated PDF"
        );
        Ok(page_count)
    }
}

impl PdfSplitter for LopdfSplitter {
    fn split(&self, input: &Path, output_dir: &Path) -> Result<Vec<SplitPage>, PdfError> {
        let source = Document::load(input)?;
        let total = source.get_pages().len() as u32;
        if total == 0 {
            return Err(PdfError::Malformed("document has no pages".into()));
        }

        std::fs::create_dir_all(output_dir)?;

        let mut pages = Vec::with_capacity(total as usize);
        for page_number in 1..=total {
            let mut single = source.clone();
            let delete: Vec<u32> = (1..=total).filter(|&n| n != page_number).collect();
            if !delete.is_empty() {
                single.delete_pages(&delete);
            }
            single.prune_objects();

            let local_path = output_dir.join(format!("page_{page_number:04}.pdf"));
            single.save(&local_path)?;

            let bytes = std::fs::read(&local_path)?;
            let sha256 = hex::encode(Sha256::digest(&bytes));

            pages.push(SplitPage {
                page_number: page_number as i32,
                local_path,
                content_type: "application/pdf".to_string(),
                size_bytes: bytes.len() as u64,
                sha256,
            });
        }

        tracing::info!(
            pages = pages.len(),
            input = %input.display(),
            "Split consolidated PDF into per-page PDFs"
        );
        Ok(pages)
    }
}

/// Merge loaded documents into one, in order.
fn merge_documents(documents: Vec<Document>, output: &Path) -> Result<usize, PdfError> {
    let mut max_id = 1;
    let mut documents_pages: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut documents_objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut merged = Document::with_version("1.5");

    for mut doc in documents {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for (_, object_id) in doc.get_pages() {
            let object = doc
                .get_object(object_id)
                .map_err(|e| PdfError::Malformed(e.to_string()))?
                .to_owned();
            documents_pages.insert(object_id, object);
        }
        documents_objects.extend(doc.objects);
    }

    let mut catalog_object: Option<(ObjectId, Object)> = None;
    let mut pages_object: Option<(ObjectId, Object)> = None;

    for (object_id, object) in documents_objects.iter() {
        match object.type_name().unwrap_or("") {
            "Catalog" => {
                catalog_object = Some((
                    catalog_object.map(|(id, _)| id).unwrap_or(*object_id),
                    object.clone(),
                ));
            }
            "Pages" => {
                if let Ok(dict) = object.as_dict() {
                    let mut dict = dict.clone();
                    if let Some((_, ref existing)) = pages_object
                        && let Ok(old_dict) = existing.as_dict()
                    {
                        dict.extend(old_dict);
                    }
                    pages_object = Some((
                        pages_object.map(|(id, _)| id).unwrap_or(*object_id),
                        Object::Dictionary(dict),
                    ));
                }
            }
            "Page" | "Outlines" | "Outline" => {}
            _ => {
                merged.objects.insert(*object_id, object.clone());
            }
        }
    }

    let (pages_id, pages_dict_object) =
        pages_object.ok_or_else(|| PdfError::Malformed("no Pages root found".into()))?;
    let (catalog_id, catalog_dict_object) =
        catalog_object.ok_or_else(|| PdfError::Malformed("no Catalog found".into()))?;

    for (object_id, object) in documents_pages.iter() {
        if let Ok(dict) = object.as_dict() {
            let mut dict = dict.clone();
            dict.set("Parent", pages_id);
            merged.objects.insert(*object_id, Object::Dictionary(dict));
        }
    }

    let page_count = documents_pages.len();

    if let Ok(dict) = pages_dict_object.as_dict() {
        let mut dict = dict.clone();
        dict.set("Count", page_count as u32);
        dict.set(
            "Kids",
            documents_pages
                .keys()
                .map(|id| Object::Reference(*id))
                .collect::<Vec<_>>(),
        );
        merged.objects.insert(pages_id, Object::Dictionary(dict));
    }

    if let Ok(dict) = catalog_dict_object.as_dict() {
        let mut dict = dict.clone();
        dict.set("Pages", pages_id);
        dict.remove(b"Outlines");
        merged.objects.insert(catalog_id, Object::Dictionary(dict));
    }

    merged.trailer.set("Root", catalog_id);
    merged.max_id = merged.objects.len() as u32;
    merged.renumber_objects();
    merged.compress();
    merged.save(output)?;

    Ok(page_count)
}

/// Render plain text onto simple Courier pages.
fn text_to_document(text: &str) -> Document {
    const LINES_PER_PAGE: usize = 60;
    const FONT_SIZE: i64 = 10;
    const LEFT_MARGIN: i64 = 50;
    const TOP_Y: i64 = 760;
    const LINE_HEIGHT: i64 = 12;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let lines: Vec<&str> = if text.is_empty() {
        vec![""]
    } else {
        text.lines().collect()
    };

    let mut kids = Vec::new();
    for chunk in lines.chunks(LINES_PER_PAGE) {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]),
            Operation::new("Td", vec![LEFT_MARGIN.into(), TOP_Y.into()]),
            Operation::new("TL", vec![LINE_HEIGHT.into()]),
        ];
        for (idx, line) in chunk.iter().enumerate() {
            if idx > 0 {
                operations.push(Operation::new("T*", vec![]));
            }
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(*line)],
            ));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Object::Stream(Stream::new(
            dictionary! {},
            content.encode().unwrap_or_default(),
        )));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as u32;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_text_pdf(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        let mut doc = text_to_document(text);
        doc.save(&path).unwrap();
        path
    }

    #[test]
    fn test_text_to_document_page_count() {
        let one_page = text_to_document("hello\nworld");
        assert_eq!(one_page.get_pages().len(), 1);

        let many_lines: String = (0..130).map(|i| format!("line {i}\n")).collect();
        let three_pages = text_to_document(&many_lines);
        assert_eq!(three_pages.get_pages().len(), 3);
    }

    #[test]
    fn test_merge_concatenates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_text_pdf(dir.path(), "a.pdf", "first document");
        let b = write_text_pdf(dir.path(), "b.pdf", "second document");

        let output = dir.path().join("merged.pdf");
        let inputs = vec![
            MergeInput {
                local_path: a,
                mime_type: "application/pdf".into(),
            },
            MergeInput {
                local_path: b,
                mime_type: "APPLICATION/PDF".into(),
            },
        ];
        let pages = LopdfMerger.merge(&inputs, &output).unwrap();
        assert_eq!(pages, 2);

        let merged = Document::load(&output).unwrap();
        assert_eq!(merged.get_pages().len(), 2);
    }

    #[test]
    fn test_merge_accepts_plain_text_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, "some notes").unwrap();

        let output = dir.path().join("merged.pdf");
        let inputs = vec![MergeInput {
            local_path: txt,
            mime_type: "Text/Plain".into(),
        }];
        assert_eq!(LopdfMerger.merge(&inputs, &output).unwrap(), 1);
    }

    #[test]
    fn test_merge_rejects_unknown_mime() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("img.png");
        std::fs::write(&bin, [0u8; 4]).unwrap();

        let err = LopdfMerger
            .merge(
                &[MergeInput {
                    local_path: bin,
                    mime_type: "image/png".into(),
                }],
                &dir.path().join("out.pdf"),
            )
            .unwrap_err();
        assert!(matches!(err, PdfError::UnsupportedMime(_)));
    }

    #[test]
    fn test_split_produces_ordered_hashed_pages() {
        let dir = tempfile::tempdir().unwrap();
        let many_lines: String = (0..130).map(|i| format!("line {i}\n")).collect();
        let input = write_text_pdf(dir.path(), "doc.pdf", &many_lines);

        let out_dir = dir.path().join("pages");
        let pages = LopdfSplitter.split(&input, &out_dir).unwrap();

        assert_eq!(pages.len(), 3);
        for (idx, page) in pages.iter().enumerate() {
            assert_eq!(page.page_number, idx as i32 + 1);
            assert_eq!(page.content_type, "application/pdf");
            assert!(page.size_bytes > 0);
            assert_eq!(page.sha256.len(), 64);
            assert!(page.local_path.exists());

            let reloaded = Document::load(&page.local_path).unwrap();
            assert_eq!(reloaded.get_pages().len(), 1);
        }
    }

    #[test]
    fn test_merge_empty_inputs_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LopdfMerger
            .merge(&[], &dir.path().join("out.pdf"))
            .unwrap_err();
        assert!(matches!(err, PdfError::Malformed(_)));
    }
}
