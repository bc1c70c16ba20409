//! End-to-end identification scenarios over a small PRONOM-shaped
//! authority: byte, container, extension and text evidence combined.

use telltale::{
    Anchor, AuthoritySpec, ContainerKind, Engine, EngineConfig, FormatDecl, Frame, Part, Pattern,
    Signature, UNKNOWN_ID,
};

// =====================================================================
// Fixture archives
// =====================================================================

/// Stored-only ZIP archive.
fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut centrals = Vec::new();
    for (name, data) in entries {
        let lfh_off = out.len() as u32;
        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // crc unchecked by the walker
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);
        centrals.push((*name, data.len() as u32, lfh_off));
    }
    let cd_off = out.len() as u32;
    for (name, len, lfh_off) in &centrals {
        out.extend_from_slice(b"PK\x01\x02");
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0u8; 12]); // extra/comment/disk/attrs
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&lfh_off.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
    }
    let cd_size = out.len() as u32 - cd_off;
    out.extend_from_slice(b"PK\x05\x06");
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(centrals.len() as u16).to_le_bytes());
    out.extend_from_slice(&(centrals.len() as u16).to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_off.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Minimal v3 OLE2 compound file: one FAT sector, one directory sector,
/// streams padded to the mini cutoff so everything lives in regular
/// sectors.
fn build_ole2(entries: &[(&str, &[u8])]) -> Vec<u8> {
    const SZ: usize = 512;
    const SECT_END: u32 = 0xFFFF_FFFE;
    const SECT_FREE: u32 = 0xFFFF_FFFF;

    let payloads: Vec<Vec<u8>> = entries
        .iter()
        .map(|(_, data)| {
            let mut p = data.to_vec();
            p.resize(p.len().max(4096), 0);
            p
        })
        .collect();

    let mut fat: Vec<u32> = vec![0xFFFF_FFFD, SECT_END];
    let mut starts = Vec::new();
    let mut next = 2u32;
    for p in &payloads {
        let sectors = p.len().div_ceil(SZ) as u32;
        starts.push(next);
        for i in 0..sectors {
            fat.push(if i + 1 == sectors { SECT_END } else { next + i + 1 });
        }
        next += sectors;
    }
    fat.resize(SZ / 4, SECT_FREE);

    let mut dir = Vec::new();
    let mut push_entry = |name: &str, typ: u8, start: u32, size: u64| {
        let mut e = vec![0u8; 128];
        let utf16: Vec<u8> = name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        e[..utf16.len().min(62)].copy_from_slice(&utf16[..utf16.len().min(62)]);
        e[64..66].copy_from_slice(&((utf16.len() + 2) as u16).to_le_bytes());
        e[66] = typ;
        e[68..72].copy_from_slice(&SECT_FREE.to_le_bytes());
        e[72..76].copy_from_slice(&SECT_FREE.to_le_bytes());
        e[76..80].copy_from_slice(&SECT_FREE.to_le_bytes());
        e[116..120].copy_from_slice(&start.to_le_bytes());
        e[120..128].copy_from_slice(&size.to_le_bytes());
        dir.extend_from_slice(&e);
    };
    push_entry("Root Entry", 5, SECT_END, 0);
    for (i, (name, _)) in entries.iter().enumerate() {
        push_entry(name, 2, starts[i], payloads[i].len() as u64);
    }
    dir.resize(SZ, 0);

    let mut out = vec![0u8; 512];
    out[..8].copy_from_slice(&[0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1]);
    out[24..26].copy_from_slice(&0x3eu16.to_le_bytes());
    out[26..28].copy_from_slice(&3u16.to_le_bytes());
    out[28..30].copy_from_slice(&0xFFFEu16.to_le_bytes());
    out[30..32].copy_from_slice(&9u16.to_le_bytes());
    out[32..34].copy_from_slice(&6u16.to_le_bytes());
    out[44..48].copy_from_slice(&1u32.to_le_bytes());
    out[48..52].copy_from_slice(&1u32.to_le_bytes());
    out[56..60].copy_from_slice(&4096u32.to_le_bytes());
    out[60..64].copy_from_slice(&SECT_END.to_le_bytes());
    out[64..68].copy_from_slice(&0u32.to_le_bytes());
    out[68..72].copy_from_slice(&SECT_END.to_le_bytes());
    out[72..76].copy_from_slice(&0u32.to_le_bytes());
    out[76..80].copy_from_slice(&0u32.to_le_bytes());
    for i in 1..109 {
        out[76 + i * 4..80 + i * 4].copy_from_slice(&SECT_FREE.to_le_bytes());
    }
    for chunk in fat {
        out.extend_from_slice(&chunk.to_le_bytes());
    }
    out.extend_from_slice(&dir);
    for p in &payloads {
        out.extend_from_slice(p);
        let pad = p.len().div_ceil(SZ) * SZ - p.len();
        out.extend_from_slice(&vec![0u8; pad]);
    }
    out
}

// =====================================================================
// Authority fixture
// =====================================================================

fn seq(b: &[u8]) -> Pattern {
    Pattern::sequence(b.to_vec())
}

fn engine() -> Engine {
    let formats = vec![
        FormatDecl {
            id: "fmt/14".into(),
            name: "Acrobat PDF".into(),
            mime: "application/pdf".into(),
            extensions: vec!["pdf".into()],
            signatures: vec![Signature::new(vec![
                Frame::fixed(Anchor::Bof, 0, seq(b"%PDF-")),
                Frame::window(Anchor::Eof, 0, 1024, seq(b"%%EOF")),
            ])],
            ..FormatDecl::default()
        },
        FormatDecl {
            id: "fmt/412".into(),
            name: "Microsoft Word (OOXML)".into(),
            extensions: vec!["docx".into()],
            containers: vec![(
                ContainerKind::Zip,
                vec![Part { name: "word/document.xml".into(), inner: None }],
            )],
            ..FormatDecl::default()
        },
        FormatDecl {
            id: "fmt/40".into(),
            name: "Microsoft Word Document".into(),
            extensions: vec!["doc".into()],
            containers: vec![(
                ContainerKind::Ole2,
                vec![Part {
                    name: "WordDocument".into(),
                    inner: Some(Signature::new(vec![Frame::window(
                        Anchor::Bof,
                        0,
                        4,
                        seq(b"\xec\xa5"),
                    )])),
                }],
            )],
            ..FormatDecl::default()
        },
        FormatDecl {
            id: "x-fmt/263".into(),
            name: "ZIP Format".into(),
            extensions: vec!["zip".into()],
            signatures: vec![Signature::new(vec![Frame::fixed(
                Anchor::Bof,
                0,
                seq(b"PK\x03\x04"),
            )])],
            ..FormatDecl::default()
        },
        FormatDecl {
            id: "x-fmt/111".into(),
            name: "Plain Text".into(),
            extensions: vec!["txt".into()],
            is_text: true,
            ..FormatDecl::default()
        },
    ];
    Engine::builder(EngineConfig::default())
        .add_authority(AuthoritySpec {
            namespace: "pronom".into(),
            formats,
            zip_default: Some("x-fmt/263".into()),
            ..AuthoritySpec::default()
        })
        .build()
        .unwrap()
}

// =====================================================================
// Scenarios
// =====================================================================

#[test]
fn pdf_with_header_and_trailer() {
    let e = engine();
    let mut doc = b"%PDF-1.4 content ".to_vec();
    doc.extend_from_slice(&[b'x'; 200]);
    doc.extend_from_slice(b"\n%%EOF");
    let out = e.identify_bytes(doc, "a.pdf", "");
    assert!(out.error.is_none());
    assert_eq!(out.ids.len(), 1);
    let id = &out.ids[0];
    assert_eq!(id.id, "fmt/14");
    assert!(id.basis.iter().any(|b| b.contains("byte match")));
    assert!(id.warning.is_empty());
}

#[test]
fn pdf_header_without_trailer_is_unknown_with_possibilities() {
    let e = engine();
    let out = e.identify_bytes(b"%PDF-1.4".to_vec(), "b.pdf", "");
    assert_eq!(out.ids.len(), 1);
    let id = &out.ids[0];
    assert_eq!(id.id, UNKNOWN_ID);
    assert_eq!(
        id.warning,
        "no match; possibilities based on extension are fmt/14"
    );
}

#[test]
fn docx_container_suppresses_generic_zip() {
    let e = engine();
    let archive = build_zip(&[
        ("[Content_Types].xml", b"<Types/>"),
        ("word/document.xml", b"<w:document/>"),
    ]);
    let out = e.identify_bytes(archive, "c.docx", "");
    assert!(out.error.is_none());
    assert_eq!(out.ids.len(), 1);
    let id = &out.ids[0];
    assert_eq!(id.id, "fmt/412");
    assert!(id.basis.iter().any(|b| b.contains("container name word/document.xml")));
    assert!(!out.ids.iter().any(|i| i.id == "x-fmt/263"));
}

#[test]
fn ole2_word_document_reports_container_basis() {
    let e = engine();
    let doc = build_ole2(&[("WordDocument", b"\xec\xa5\xc1\x00 body")]);
    let out = e.identify_bytes(doc, "d.doc", "");
    assert!(out.error.is_none());
    assert_eq!(out.ids.len(), 1);
    let id = &out.ids[0];
    assert_eq!(id.id, "fmt/40");
    assert!(id.basis.iter().any(|b| b.contains("container name WordDocument")));
}

#[test]
fn unmatched_binary_is_unknown() {
    let e = engine();
    let out = e.identify_bytes(vec![0x00, 0x01, 0x02, 0x03, 0x80, 0xff], "x.xyz", "");
    assert_eq!(out.ids.len(), 1);
    assert_eq!(out.ids[0].id, UNKNOWN_ID);
    assert_eq!(out.ids[0].warning, "no match");
}

#[test]
fn utf8_text_reports_extension_and_text() {
    let e = engine();
    let out = e.identify_bytes(b"Hello\n".to_vec(), "r.txt", "");
    assert_eq!(out.ids.len(), 1);
    let id = &out.ids[0];
    assert_eq!(id.id, "x-fmt/111");
    // Extension and text evidence together clear the low-confidence bar,
    // so the match reports without an "only" annotation.
    assert!(id.basis.iter().any(|b| b == "extension match"));
    assert!(id.basis.iter().any(|b| b == "text match"));
    assert_eq!(id.warning, "");
}

#[test]
fn plain_zip_reports_generic_zip_format() {
    let e = engine();
    let archive = build_zip(&[("readme.txt", b"hi")]);
    let out = e.identify_bytes(archive, "plain.bin", "");
    assert!(out.error.is_none());
    assert_eq!(out.ids.len(), 1);
    let id = &out.ids[0];
    assert_eq!(id.id, "x-fmt/263");
    assert_eq!(id.warning, "extension mismatch");
}

#[test]
fn zip_named_zip_short_circuits_on_default() {
    let e = engine();
    let archive = build_zip(&[("readme.txt", b"hi")]);
    let out = e.identify_bytes(archive, "archive.zip", "");
    assert!(out.error.is_none());
    assert_eq!(out.ids.len(), 1);
    let id = &out.ids[0];
    assert_eq!(id.id, "x-fmt/263");
    assert!(id
        .basis
        .iter()
        .any(|b| b.contains("container match with trigger and default extension")));
}

#[test]
fn declared_mime_scores_alongside_bytes() {
    let e = engine();
    let mut doc = b"%PDF-1.4 ".to_vec();
    doc.extend_from_slice(b"%%EOF");
    let out = e.identify_bytes(doc, "a.pdf", "application/pdf");
    assert_eq!(out.ids[0].id, "fmt/14");
    assert!(out.ids[0].warning.is_empty());
}

#[test]
fn stream_input_without_name_still_matches_bytes() {
    let e = engine();
    let mut doc = b"%PDF-1.4 stream ".to_vec();
    doc.extend_from_slice(b"%%EOF");
    let out = e.identify_reader(std::io::Cursor::new(doc), "", "");
    assert_eq!(out.ids[0].id, "fmt/14");
    // The name matcher never ran, so no extension mismatch warning.
    assert!(out.ids[0].warning.is_empty());
}
