//! S3 XML documents: response rendering and request-body parsing.
//!
//! Every S3 response body is XML. Rendering goes through a small
//! [`XmlDoc`] wrapper over `quick-xml` (writing into a `Vec` cannot fail,
//! so the wrapper keeps the call sites flat). Request-body parsers for
//! `Delete`, `CompleteMultipartUpload`, `CreateBucketConfiguration`, and
//! `AccessControlPolicy` live here too so the whole wire format has one
//! seam.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

use crate::errors::S3Error;
use crate::metadata::store::{Acl, AclGrant, AclGrantee, AclOwner};

/// The S3 document namespace carried on every result root (but never on
/// `<Error>`).
const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

// -- Writer wrapper ----------------------------------------------------------

struct XmlDoc {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl XmlDoc {
    fn new() -> Self {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .expect("write to Vec");
        Self { writer }
    }

    fn open(&mut self, tag: &str) -> &mut Self {
        self.writer
            .write_event(Event::Start(BytesStart::new(tag)))
            .expect("write to Vec");
        self
    }

    /// Open a root element carrying the S3 namespace.
    fn open_root(&mut self, tag: &str) -> &mut Self {
        let elem = BytesStart::new(tag).with_attributes([("xmlns", S3_XMLNS)]);
        self.writer
            .write_event(Event::Start(elem))
            .expect("write to Vec");
        self
    }

    fn close(&mut self, tag: &str) -> &mut Self {
        self.writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .expect("write to Vec");
        self
    }

    fn leaf(&mut self, tag: &str, text: &str) -> &mut Self {
        self.open(tag);
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .expect("write to Vec");
        self.close(tag)
    }

    fn leaves(&mut self, parent: &str, children: &[(&str, &str)]) -> &mut Self {
        self.open(parent);
        for (tag, text) in children {
            self.leaf(tag, text);
        }
        self.close(parent)
    }

    fn finish(self) -> String {
        String::from_utf8(self.writer.into_inner().into_inner()).expect("utf-8 xml")
    }
}

// -- Error -------------------------------------------------------------------

/// Render the `<Error>` document. Deliberately namespace-free.
pub fn render_error(code: &str, message: &str, resource: &str, request_id: &str) -> String {
    let mut doc = XmlDoc::new();
    doc.leaves(
        "Error",
        &[
            ("Code", code),
            ("Message", message),
            ("Resource", resource),
            ("RequestId", request_id),
        ],
    );
    doc.finish()
}

// -- Service / bucket documents ----------------------------------------------

/// `<ListAllMyBucketsResult>` for `GET /`. `buckets` is `(name, created)`.
pub fn render_list_buckets(
    owner_id: &str,
    owner_display: &str,
    buckets: &[(&str, &str)],
) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("ListAllMyBucketsResult");
    doc.leaves("Owner", &[("ID", owner_id), ("DisplayName", owner_display)]);
    doc.open("Buckets");
    for (name, created) in buckets {
        doc.leaves("Bucket", &[("Name", name), ("CreationDate", created)]);
    }
    doc.close("Buckets");
    doc.close("ListAllMyBucketsResult");
    doc.finish()
}

/// `<LocationConstraint>`: us-east-1 renders as the empty element.
pub fn render_location_constraint(region: &str) -> String {
    let mut doc = XmlDoc::new();
    if region.is_empty() || region == "us-east-1" {
        let elem = BytesStart::new("LocationConstraint").with_attributes([("xmlns", S3_XMLNS)]);
        doc.writer
            .write_event(Event::Empty(elem))
            .expect("write to Vec");
    } else {
        doc.open_root("LocationConstraint");
        doc.writer
            .write_event(Event::Text(BytesText::new(region)))
            .expect("write to Vec");
        doc.close("LocationConstraint");
    }
    doc.finish()
}

// -- Listing documents -------------------------------------------------------

/// One `<Contents>` entry of a list-objects response.
pub struct ObjectEntry<'a> {
    pub key: &'a str,
    pub last_modified: &'a str,
    pub etag: &'a str,
    pub size: u64,
    pub storage_class: &'a str,
}

fn write_contents(doc: &mut XmlDoc, entries: &[ObjectEntry<'_>], common_prefixes: &[String]) {
    for entry in entries {
        doc.open("Contents")
            .leaf("Key", entry.key)
            .leaf("LastModified", entry.last_modified)
            .leaf("ETag", entry.etag)
            .leaf("Size", &entry.size.to_string())
            .leaf("StorageClass", entry.storage_class)
            .close("Contents");
    }
    for prefix in common_prefixes {
        doc.open("CommonPrefixes")
            .leaf("Prefix", prefix)
            .close("CommonPrefixes");
    }
}

/// `<ListBucketResult>` for ListObjectsV2.
#[allow(clippy::too_many_arguments)]
pub fn render_list_objects_v2(
    bucket: &str,
    prefix: &str,
    delimiter: &str,
    max_keys: u32,
    is_truncated: bool,
    entries: &[ObjectEntry<'_>],
    common_prefixes: &[String],
    continuation_token: Option<&str>,
    next_continuation_token: Option<&str>,
    start_after: Option<&str>,
) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("ListBucketResult");
    doc.leaf("Name", bucket).leaf("Prefix", prefix);
    if !delimiter.is_empty() {
        doc.leaf("Delimiter", delimiter);
    }
    doc.leaf("MaxKeys", &max_keys.to_string());
    doc.leaf(
        "KeyCount",
        &((entries.len() + common_prefixes.len()) as u32).to_string(),
    );
    doc.leaf("IsTruncated", if is_truncated { "true" } else { "false" });
    if let Some(token) = continuation_token {
        doc.leaf("ContinuationToken", token);
    }
    if let Some(token) = next_continuation_token {
        doc.leaf("NextContinuationToken", token);
    }
    if let Some(sa) = start_after.filter(|s| !s.is_empty()) {
        doc.leaf("StartAfter", sa);
    }
    write_contents(&mut doc, entries, common_prefixes);
    doc.close("ListBucketResult");
    doc.finish()
}

/// `<ListBucketResult>` for ListObjectsV1.
#[allow(clippy::too_many_arguments)]
pub fn render_list_objects_v1(
    bucket: &str,
    prefix: &str,
    delimiter: &str,
    marker: &str,
    max_keys: u32,
    is_truncated: bool,
    entries: &[ObjectEntry<'_>],
    common_prefixes: &[String],
    next_marker: Option<&str>,
) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("ListBucketResult");
    doc.leaf("Name", bucket)
        .leaf("Prefix", prefix)
        .leaf("Marker", marker);
    if !delimiter.is_empty() {
        doc.leaf("Delimiter", delimiter);
    }
    doc.leaf("MaxKeys", &max_keys.to_string());
    doc.leaf("IsTruncated", if is_truncated { "true" } else { "false" });
    if let Some(nm) = next_marker {
        doc.leaf("NextMarker", nm);
    }
    write_contents(&mut doc, entries, common_prefixes);
    doc.close("ListBucketResult");
    doc.finish()
}

// -- Delete / copy documents -------------------------------------------------

/// Per-key outcome of a bulk delete.
pub struct DeleteOutcome {
    pub key: String,
    /// `None` means deleted; `Some((code, message))` is an error entry.
    pub error: Option<(String, String)>,
}

/// `<DeleteResult>`; quiet mode suppresses `<Deleted>` entries.
pub fn render_delete_result(outcomes: &[DeleteOutcome], quiet: bool) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("DeleteResult");
    for outcome in outcomes {
        match &outcome.error {
            None if !quiet => {
                doc.open("Deleted").leaf("Key", &outcome.key).close("Deleted");
            }
            None => {}
            Some((code, message)) => {
                doc.open("Error")
                    .leaf("Key", &outcome.key)
                    .leaf("Code", code)
                    .leaf("Message", message)
                    .close("Error");
            }
        }
    }
    doc.close("DeleteResult");
    doc.finish()
}

/// `<CopyObjectResult>` returned by PUT with `x-amz-copy-source`.
pub fn render_copy_object_result(etag: &str, last_modified: &str) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("CopyObjectResult");
    doc.leaf("ETag", etag).leaf("LastModified", last_modified);
    doc.close("CopyObjectResult");
    doc.finish()
}

/// `<CopyPartResult>` for UploadPartCopy.
pub fn render_copy_part_result(etag: &str, last_modified: &str) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("CopyPartResult");
    doc.leaf("ETag", etag).leaf("LastModified", last_modified);
    doc.close("CopyPartResult");
    doc.finish()
}

// -- Multipart documents -----------------------------------------------------

/// `<InitiateMultipartUploadResult>`.
pub fn render_initiate_multipart_upload(bucket: &str, key: &str, upload_id: &str) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("InitiateMultipartUploadResult");
    doc.leaf("Bucket", bucket)
        .leaf("Key", key)
        .leaf("UploadId", upload_id);
    doc.close("InitiateMultipartUploadResult");
    doc.finish()
}

/// `<CompleteMultipartUploadResult>`.
pub fn render_complete_multipart_upload(
    location: &str,
    bucket: &str,
    key: &str,
    etag: &str,
) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("CompleteMultipartUploadResult");
    doc.leaf("Location", location)
        .leaf("Bucket", bucket)
        .leaf("Key", key)
        .leaf("ETag", etag);
    doc.close("CompleteMultipartUploadResult");
    doc.finish()
}

/// One `<Upload>` entry of a ListMultipartUploads response.
pub struct UploadEntry<'a> {
    pub key: &'a str,
    pub upload_id: &'a str,
    pub initiated: &'a str,
    pub storage_class: &'a str,
    pub owner_id: &'a str,
    pub owner_display: &'a str,
}

/// `<ListMultipartUploadsResult>`.
#[allow(clippy::too_many_arguments)]
pub fn render_list_multipart_uploads(
    bucket: &str,
    prefix: &str,
    key_marker: &str,
    upload_id_marker: &str,
    max_uploads: u32,
    is_truncated: bool,
    entries: &[UploadEntry<'_>],
    next_key_marker: Option<&str>,
    next_upload_id_marker: Option<&str>,
) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("ListMultipartUploadsResult");
    doc.leaf("Bucket", bucket)
        .leaf("KeyMarker", key_marker)
        .leaf("UploadIdMarker", upload_id_marker);
    if let Some(nkm) = next_key_marker {
        doc.leaf("NextKeyMarker", nkm);
    }
    if let Some(nuim) = next_upload_id_marker {
        doc.leaf("NextUploadIdMarker", nuim);
    }
    doc.leaf("MaxUploads", &max_uploads.to_string());
    doc.leaf("IsTruncated", if is_truncated { "true" } else { "false" });
    if !prefix.is_empty() {
        doc.leaf("Prefix", prefix);
    }
    for entry in entries {
        doc.open("Upload")
            .leaf("Key", entry.key)
            .leaf("UploadId", entry.upload_id)
            .leaves(
                "Initiator",
                &[("ID", entry.owner_id), ("DisplayName", entry.owner_display)],
            )
            .leaves(
                "Owner",
                &[("ID", entry.owner_id), ("DisplayName", entry.owner_display)],
            )
            .leaf("StorageClass", entry.storage_class)
            .leaf("Initiated", entry.initiated)
            .close("Upload");
    }
    doc.close("ListMultipartUploadsResult");
    doc.finish()
}

/// One `<Part>` entry of a ListParts response.
pub struct PartEntry<'a> {
    pub part_number: u32,
    pub last_modified: &'a str,
    pub etag: &'a str,
    pub size: u64,
}

/// `<ListPartsResult>`.
#[allow(clippy::too_many_arguments)]
pub fn render_list_parts(
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number_marker: u32,
    max_parts: u32,
    is_truncated: bool,
    parts: &[PartEntry<'_>],
    next_part_number_marker: Option<u32>,
    storage_class: &str,
    owner_id: &str,
    owner_display: &str,
) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("ListPartsResult");
    doc.leaf("Bucket", bucket)
        .leaf("Key", key)
        .leaf("UploadId", upload_id)
        .leaves("Initiator", &[("ID", owner_id), ("DisplayName", owner_display)])
        .leaves("Owner", &[("ID", owner_id), ("DisplayName", owner_display)])
        .leaf("StorageClass", storage_class)
        .leaf("PartNumberMarker", &part_number_marker.to_string());
    if let Some(marker) = next_part_number_marker {
        doc.leaf("NextPartNumberMarker", &marker.to_string());
    }
    doc.leaf("MaxParts", &max_parts.to_string());
    doc.leaf("IsTruncated", if is_truncated { "true" } else { "false" });
    for part in parts {
        doc.open("Part")
            .leaf("PartNumber", &part.part_number.to_string())
            .leaf("LastModified", part.last_modified)
            .leaf("ETag", part.etag)
            .leaf("Size", &part.size.to_string())
            .close("Part");
    }
    doc.close("ListPartsResult");
    doc.finish()
}

// -- ACL document ------------------------------------------------------------

/// `<AccessControlPolicy>` with `xsi:type` attributes on each grantee.
pub fn render_access_control_policy(acl: &Acl) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("AccessControlPolicy");
    doc.leaves(
        "Owner",
        &[("ID", &acl.owner.id), ("DisplayName", &acl.owner.display_name)],
    );
    doc.open("AccessControlList");
    for grant in &acl.grants {
        doc.open("Grant");
        let mut grantee = BytesStart::new("Grantee");
        grantee.push_attribute(("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"));
        match &grant.grantee {
            AclGrantee::CanonicalUser { id, display_name } => {
                grantee.push_attribute(("xsi:type", "CanonicalUser"));
                doc.writer
                    .write_event(Event::Start(grantee))
                    .expect("write to Vec");
                doc.leaf("ID", id).leaf("DisplayName", display_name);
            }
            AclGrantee::Group { uri } => {
                grantee.push_attribute(("xsi:type", "Group"));
                doc.writer
                    .write_event(Event::Start(grantee))
                    .expect("write to Vec");
                doc.leaf("URI", uri);
            }
        }
        doc.close("Grantee");
        doc.leaf("Permission", &grant.permission);
        doc.close("Grant");
    }
    doc.close("AccessControlList");
    doc.close("AccessControlPolicy");
    doc.finish()
}

// -- Request-body parsers ----------------------------------------------------

/// Strip an optional namespace prefix from a tag name.
fn local_name(tag: &str) -> &str {
    tag.rsplit(':').next().unwrap_or(tag)
}

/// Parse the `<Delete>` body of a bulk DeleteObjects request into
/// `(keys, quiet)`.
pub fn parse_delete_objects(body: &[u8]) -> Result<(Vec<String>, bool), S3Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut keys = Vec::new();
    let mut quiet = false;
    let mut in_object = false;
    let mut current = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                current = local_name(&tag).to_string();
                if current == "Object" {
                    in_object = true;
                }
            }
            Ok(Event::End(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if local_name(&tag) == "Object" {
                    in_object = false;
                }
                current.clear();
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|_| S3Error::MalformedXML)?.to_string();
                if in_object && current == "Key" {
                    keys.push(text);
                } else if current == "Quiet" {
                    quiet = text == "true";
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedXML),
            _ => {}
        }
        buf.clear();
    }

    if keys.is_empty() {
        return Err(S3Error::MalformedXML);
    }
    Ok((keys, quiet))
}

/// Parse `<CompleteMultipartUpload>` into `(part_number, etag)` pairs in
/// document order.
pub fn parse_complete_multipart_upload(body: &[u8]) -> Result<Vec<(u32, String)>, S3Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut parts = Vec::new();
    let mut in_part = false;
    let mut current = String::new();
    let mut part_number: Option<u32> = None;
    let mut etag: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let tag = local_name(&tag).to_string();
                if tag == "Part" {
                    in_part = true;
                    part_number = None;
                    etag = None;
                } else if in_part {
                    current = tag;
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_part {
                    let text = e.unescape().map_err(|_| S3Error::MalformedXML)?.to_string();
                    match current.as_str() {
                        "PartNumber" => part_number = text.parse().ok(),
                        "ETag" => etag = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if local_name(&tag) == "Part" {
                    in_part = false;
                    current.clear();
                    match (part_number.take(), etag.take()) {
                        (Some(pn), Some(tag)) => parts.push((pn, tag)),
                        _ => return Err(S3Error::MalformedXML),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedXML),
            _ => {}
        }
        buf.clear();
    }

    if parts.is_empty() {
        return Err(S3Error::MalformedXML);
    }
    Ok(parts)
}

/// Extract `<LocationConstraint>` from a `CreateBucketConfiguration` body.
/// Empty or absent means "no constraint".
pub fn parse_location_constraint(body: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut in_location = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                in_location = local_name(&tag) == "LocationConstraint";
            }
            Ok(Event::Text(ref e)) if in_location => {
                let text = e.unescape().ok()?.trim().to_string();
                return if text.is_empty() { None } else { Some(text) };
            }
            Ok(Event::End(_)) => in_location = false,
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

/// Parse an `<AccessControlPolicy>` request body into an [`Acl`].
///
/// Missing Owner fields fall back to the supplied defaults (PutBucketAcl
/// cannot change ownership anyway).
pub fn parse_access_control_policy(
    body: &[u8],
    default_owner_id: &str,
    default_owner_display: &str,
) -> Result<Acl, S3Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut owner_id = default_owner_id.to_string();
    let mut owner_display = default_owner_display.to_string();

    let mut in_owner = false;
    let mut in_grant = false;
    let mut in_grantee = false;
    let mut current = String::new();

    let mut grantee_type = String::new();
    let mut grantee_id = String::new();
    let mut grantee_display = String::new();
    let mut grantee_uri = String::new();
    let mut permission = String::new();

    let mut grants: Vec<AclGrant> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let tag = local_name(&tag).to_string();
                match tag.as_str() {
                    "Owner" => in_owner = true,
                    "Grant" => {
                        in_grant = true;
                        grantee_type.clear();
                        grantee_id.clear();
                        grantee_display.clear();
                        grantee_uri.clear();
                        permission.clear();
                    }
                    "Grantee" if in_grant => {
                        in_grantee = true;
                        for attr in e.attributes().flatten() {
                            let name = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                            if local_name(&name) == "type" {
                                grantee_type = String::from_utf8_lossy(&attr.value).to_string();
                            }
                        }
                    }
                    _ => {}
                }
                current = tag;
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|_| S3Error::MalformedXML)?.to_string();
                if text.is_empty() {
                    buf.clear();
                    continue;
                }
                if in_grantee {
                    match current.as_str() {
                        "ID" => grantee_id = text,
                        "DisplayName" => grantee_display = text,
                        "URI" => grantee_uri = text,
                        _ => {}
                    }
                } else if in_owner {
                    match current.as_str() {
                        "ID" => owner_id = text,
                        "DisplayName" => owner_display = text,
                        _ => {}
                    }
                } else if in_grant && current == "Permission" {
                    permission = text;
                }
            }
            Ok(Event::End(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match local_name(&tag) {
                    "Owner" => in_owner = false,
                    "Grantee" => in_grantee = false,
                    "Grant" => {
                        if in_grant {
                            let grantee = if grantee_type == "Group" || !grantee_uri.is_empty() {
                                AclGrantee::Group {
                                    uri: grantee_uri.clone(),
                                }
                            } else {
                                AclGrantee::CanonicalUser {
                                    id: grantee_id.clone(),
                                    display_name: grantee_display.clone(),
                                }
                            };
                            grants.push(AclGrant {
                                grantee,
                                permission: permission.clone(),
                            });
                            in_grant = false;
                        }
                    }
                    _ => {}
                }
                current.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedXML),
            _ => {}
        }
        buf.clear();
    }

    Ok(Acl {
        owner: AclOwner {
            id: owner_id,
            display_name: owner_display,
        },
        grants,
    })
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_document_shape() {
        let xml = render_error("NoSuchKey", "The specified key does not exist.", "/k", "REQID");
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        // No namespace on Error.
        assert!(xml.contains("<Error><Code>NoSuchKey</Code>"));
        assert!(!xml.contains("Error xmlns"));
        assert!(xml.contains("<RequestId>REQID</RequestId>"));
    }

    #[test]
    fn error_document_escapes_message() {
        let xml = render_error("InvalidArgument", "a < b & c", "", "R");
        assert!(xml.contains("a &lt; b &amp; c"));
    }

    #[test]
    fn list_buckets_document() {
        let xml = render_list_buckets(
            "owner",
            "Owner",
            &[("alpha", "2026-01-01T00:00:00.000Z"), ("beta", "2026-01-02T00:00:00.000Z")],
        );
        assert!(xml.contains("ListAllMyBucketsResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\""));
        assert!(xml.contains("<Name>alpha</Name>"));
        assert!(xml.contains("<Name>beta</Name>"));
    }

    #[test]
    fn location_constraint_us_east_1_is_empty_element() {
        let xml = render_location_constraint("us-east-1");
        assert!(xml.contains("<LocationConstraint xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"/>"));
        let other = render_location_constraint("eu-west-1");
        assert!(other.contains(">eu-west-1</LocationConstraint>"));
    }

    #[test]
    fn list_objects_v2_document() {
        let entries = vec![ObjectEntry {
            key: "c",
            last_modified: "2026-01-01T00:00:00.000Z",
            etag: "\"abc\"",
            size: 3,
            storage_class: "STANDARD",
        }];
        let prefixes = vec!["a/".to_string(), "b/".to_string()];
        let xml = render_list_objects_v2(
            "bkt", "", "/", 1000, false, &entries, &prefixes, None, None, None,
        );
        assert!(xml.contains("<KeyCount>3</KeyCount>"));
        assert!(xml.contains("<Delimiter>/</Delimiter>"));
        assert!(xml.contains("<Key>c</Key>"));
        assert!(xml.contains("<Prefix>a/</Prefix>"));
        assert!(xml.contains("<Prefix>b/</Prefix>"));
        assert!(xml.contains("<IsTruncated>false</IsTruncated>"));
    }

    #[test]
    fn delete_result_quiet_mode() {
        let outcomes = vec![
            DeleteOutcome {
                key: "gone".into(),
                error: None,
            },
            DeleteOutcome {
                key: "stuck".into(),
                error: Some(("InternalError".into(), "boom".into())),
            },
        ];
        let loud = render_delete_result(&outcomes, false);
        assert!(loud.contains("<Deleted><Key>gone</Key></Deleted>"));
        assert!(loud.contains("<Code>InternalError</Code>"));
        let quiet = render_delete_result(&outcomes, true);
        assert!(!quiet.contains("<Deleted>"));
        assert!(quiet.contains("<Key>stuck</Key>"));
    }

    #[test]
    fn acl_document_grantee_types() {
        let acl = Acl {
            owner: AclOwner {
                id: "o".into(),
                display_name: "O".into(),
            },
            grants: vec![
                AclGrant {
                    grantee: AclGrantee::CanonicalUser {
                        id: "o".into(),
                        display_name: "O".into(),
                    },
                    permission: "FULL_CONTROL".into(),
                },
                AclGrant {
                    grantee: AclGrantee::Group {
                        uri: "http://acs.amazonaws.com/groups/global/AllUsers".into(),
                    },
                    permission: "READ".into(),
                },
            ],
        };
        let xml = render_access_control_policy(&acl);
        assert!(xml.contains("xsi:type=\"CanonicalUser\""));
        assert!(xml.contains("xsi:type=\"Group\""));
        assert!(xml.contains("<Permission>FULL_CONTROL</Permission>"));
        assert!(xml.contains("<URI>http://acs.amazonaws.com/groups/global/AllUsers</URI>"));
    }

    #[test]
    fn parse_delete_body() {
        let body = br#"<Delete><Quiet>true</Quiet>
            <Object><Key>a</Key></Object>
            <Object><Key>b/c</Key></Object></Delete>"#;
        let (keys, quiet) = parse_delete_objects(body).unwrap();
        assert_eq!(keys, vec!["a", "b/c"]);
        assert!(quiet);
    }

    #[test]
    fn parse_delete_body_requires_keys() {
        assert!(parse_delete_objects(b"<Delete></Delete>").is_err());
        assert!(parse_delete_objects(b"not xml").is_err());
    }

    #[test]
    fn parse_complete_body() {
        let body = br#"<CompleteMultipartUpload>
            <Part><PartNumber>1</PartNumber><ETag>"aaa"</ETag></Part>
            <Part><PartNumber>2</PartNumber><ETag>bbb</ETag></Part>
        </CompleteMultipartUpload>"#;
        let parts = parse_complete_multipart_upload(body).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], (1, "\"aaa\"".to_string()));
        assert_eq!(parts[1], (2, "bbb".to_string()));
    }

    #[test]
    fn parse_complete_body_rejects_partial_parts() {
        let missing_etag =
            b"<CompleteMultipartUpload><Part><PartNumber>1</PartNumber></Part></CompleteMultipartUpload>";
        assert!(parse_complete_multipart_upload(missing_etag).is_err());
        let empty = b"<CompleteMultipartUpload></CompleteMultipartUpload>";
        assert!(parse_complete_multipart_upload(empty).is_err());
    }

    #[test]
    fn parse_location_constraint_body() {
        let body = br#"<?xml version="1.0"?>
            <CreateBucketConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
              <LocationConstraint>us-west-2</LocationConstraint>
            </CreateBucketConfiguration>"#;
        assert_eq!(parse_location_constraint(body), Some("us-west-2".into()));
        assert_eq!(parse_location_constraint(b""), None);
    }

    #[test]
    fn acl_round_trip_through_parser() {
        let acl = Acl::full_control("owner-1", "Owner One");
        let xml = render_access_control_policy(&acl);
        let parsed = parse_access_control_policy(xml.as_bytes(), "fallback", "fallback").unwrap();
        assert_eq!(parsed.owner.id, "owner-1");
        assert_eq!(parsed.grants.len(), 1);
        assert_eq!(parsed.grants[0].permission, "FULL_CONTROL");
        match &parsed.grants[0].grantee {
            AclGrantee::CanonicalUser { id, .. } => assert_eq!(id, "owner-1"),
            other => panic!("unexpected grantee {other:?}"),
        }
    }
}
