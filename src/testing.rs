//! Fixtures shared by unit tests: a minimal class-file writer, jar helpers
//! and a canned HTTP responder.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;

static COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "annotation_extractor_test_{}_{}_{}_{}",
        std::process::id(),
        nanos,
        n,
        name
    ))
}

pub(crate) fn write_jar(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }
    zip.finish()?;
    Ok(())
}

type Routes = HashMap<String, (u16, Vec<u8>)>;

/// Serves fixed responses keyed by request path on a loopback port; unknown
/// paths get a 404. Every request is recorded as `METHOD path body`.
pub(crate) struct StubServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub(crate) fn start(routes: Vec<(&str, u16, Vec<u8>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Routes = routes
            .into_iter()
            .map(|(path, status, body)| (path.to_string(), (status, body)))
            .collect();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let _ = respond(stream, &routes, &log);
            }
        });
        Self { addr, requests }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

fn respond(stream: TcpStream, routes: &Routes, log: &Mutex<Vec<String>>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();
    log.lock()
        .push(format!("{method} {path} {}", String::from_utf8_lossy(&body)));

    let (status, payload) = routes
        .get(path)
        .cloned()
        .unwrap_or((404, b"not found".to_vec()));
    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 {status} Stub\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        payload.len()
    )?;
    stream.write_all(&payload)?;
    stream.flush()
}

#[derive(Debug, Clone)]
pub(crate) enum ElementValue {
    Int(i32),
    Str(&'static str),
    Enum(&'static str, &'static str),
    Class(&'static str),
    Annotation(&'static str, Vec<(&'static str, ElementValue)>),
    Array(Vec<ElementValue>),
}

type Pairs = Vec<(&'static str, ElementValue)>;

/// Writes just enough of a class file for the annotation reader: a real
/// constant pool, members with `Code`/`LineNumberTable` noise, and annotation
/// attributes with arbitrary element values.
pub(crate) struct ClassBuilder {
    name: String,
    pool: Vec<u8>,
    next_index: u16,
    utf8_cache: HashMap<String, u16>,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
    class_annotations: Vec<(String, bool, Pairs)>,
}

impl ClassBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pool: Vec::new(),
            next_index: 1,
            utf8_cache: HashMap::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            class_annotations: Vec::new(),
        }
    }

    fn utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.utf8_cache.get(value) {
            return *index;
        }
        self.pool.push(1);
        self.pool.extend((value.len() as u16).to_be_bytes());
        self.pool.extend(value.as_bytes());
        let index = self.next_index;
        self.next_index += 1;
        self.utf8_cache.insert(value.to_string(), index);
        index
    }

    fn class_ref(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.pool.push(7);
        self.pool.extend(name_index.to_be_bytes());
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn int_constant(&mut self, value: i32) -> u16 {
        self.pool.push(3);
        self.pool.extend(value.to_be_bytes());
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    pub(crate) fn long_constant(mut self, value: i64) -> Self {
        self.pool.push(5);
        self.pool.extend(value.to_be_bytes());
        self.next_index += 2;
        self
    }

    pub(crate) fn double_constant(mut self, value: f64) -> Self {
        self.pool.push(6);
        self.pool.extend(value.to_bits().to_be_bytes());
        self.next_index += 2;
        self
    }

    fn element_value(&mut self, out: &mut Vec<u8>, value: &ElementValue) {
        match value {
            ElementValue::Int(v) => {
                out.push(b'I');
                let index = self.int_constant(*v);
                out.extend(index.to_be_bytes());
            }
            ElementValue::Str(v) => {
                out.push(b's');
                let index = self.utf8(v);
                out.extend(index.to_be_bytes());
            }
            ElementValue::Enum(ty, constant) => {
                out.push(b'e');
                let ty = self.utf8(ty);
                let constant = self.utf8(constant);
                out.extend(ty.to_be_bytes());
                out.extend(constant.to_be_bytes());
            }
            ElementValue::Class(descriptor) => {
                out.push(b'c');
                let index = self.utf8(descriptor);
                out.extend(index.to_be_bytes());
            }
            ElementValue::Annotation(descriptor, pairs) => {
                out.push(b'@');
                self.annotation(out, descriptor, pairs);
            }
            ElementValue::Array(values) => {
                out.push(b'[');
                out.extend((values.len() as u16).to_be_bytes());
                for v in values {
                    self.element_value(out, v);
                }
            }
        }
    }

    fn annotation(
        &mut self,
        out: &mut Vec<u8>,
        descriptor: &str,
        pairs: &[(&'static str, ElementValue)],
    ) {
        let type_index = self.utf8(descriptor);
        out.extend(type_index.to_be_bytes());
        out.extend((pairs.len() as u16).to_be_bytes());
        for (name, value) in pairs {
            let name_index = self.utf8(name);
            out.extend(name_index.to_be_bytes());
            self.element_value(out, value);
        }
    }

    fn attribute(&mut self, name: &str, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let name_index = self.utf8(name);
        out.extend(name_index.to_be_bytes());
        out.extend((body.len() as u32).to_be_bytes());
        out.extend(body);
        out
    }

    fn annotation_attributes(&mut self, annotations: &[(String, bool, Pairs)]) -> Vec<Vec<u8>> {
        let mut attributes = Vec::new();
        for (attr_name, visible) in [
            ("RuntimeVisibleAnnotations", true),
            ("RuntimeInvisibleAnnotations", false),
        ] {
            let selected: Vec<_> = annotations.iter().filter(|a| a.1 == visible).collect();
            if selected.is_empty() {
                continue;
            }
            let mut body = Vec::new();
            body.extend((selected.len() as u16).to_be_bytes());
            for (descriptor, _, pairs) in selected {
                self.annotation(&mut body, descriptor, pairs);
            }
            attributes.push(self.attribute(attr_name, &body));
        }
        attributes
    }

    fn member(
        &mut self,
        name: &str,
        descriptor: &str,
        annotations: &[(&str, bool)],
        with_code: bool,
    ) -> Vec<u8> {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);

        let mut attributes = Vec::new();
        if with_code {
            let mut line_numbers = Vec::new();
            line_numbers.extend(1u16.to_be_bytes());
            line_numbers.extend(0u16.to_be_bytes());
            line_numbers.extend(7u16.to_be_bytes());
            let line_table = self.attribute("LineNumberTable", &line_numbers);

            let mut code = Vec::new();
            code.extend(1u16.to_be_bytes()); // max_stack
            code.extend(1u16.to_be_bytes()); // max_locals
            code.extend(1u32.to_be_bytes());
            code.push(0xb1); // return
            code.extend(0u16.to_be_bytes());
            code.extend(1u16.to_be_bytes());
            code.extend(line_table);
            attributes.push(self.attribute("Code", &code));
        }
        let owned: Vec<(String, bool, Pairs)> = annotations
            .iter()
            .map(|(d, v)| (d.to_string(), *v, Vec::new()))
            .collect();
        attributes.extend(self.annotation_attributes(&owned));

        let mut out = Vec::new();
        out.extend(0x0001u16.to_be_bytes());
        out.extend(name_index.to_be_bytes());
        out.extend(descriptor_index.to_be_bytes());
        out.extend((attributes.len() as u16).to_be_bytes());
        for attr in attributes {
            out.extend(attr);
        }
        out
    }

    pub(crate) fn field(
        mut self,
        name: &str,
        descriptor: &str,
        annotations: &[(&str, bool)],
    ) -> Self {
        let bytes = self.member(name, descriptor, annotations, false);
        self.fields.push(bytes);
        self
    }

    pub(crate) fn method(
        mut self,
        name: &str,
        descriptor: &str,
        annotations: &[(&str, bool)],
    ) -> Self {
        let bytes = self.member(name, descriptor, annotations, true);
        self.methods.push(bytes);
        self
    }

    pub(crate) fn class_annotation(self, descriptor: &str, visible: bool) -> Self {
        self.class_annotation_with(descriptor, visible, Vec::new())
    }

    pub(crate) fn class_annotation_with(
        mut self,
        descriptor: &str,
        visible: bool,
        pairs: Pairs,
    ) -> Self {
        self.class_annotations.push((descriptor.to_string(), visible, pairs));
        self
    }

    pub(crate) fn build(mut self) -> Vec<u8> {
        let name = self.name.clone();
        let this_class = self.class_ref(&name);
        let super_class = self.class_ref("java/lang/Object");

        let source_file = self.utf8("Fixture.java");
        let mut attributes = vec![self.attribute("SourceFile", &source_file.to_be_bytes())];
        let class_annotations = std::mem::take(&mut self.class_annotations);
        attributes.extend(self.annotation_attributes(&class_annotations));

        let mut out = Vec::new();
        out.extend(0xCAFE_BABEu32.to_be_bytes());
        out.extend(0u16.to_be_bytes());
        out.extend(52u16.to_be_bytes());
        out.extend(self.next_index.to_be_bytes());
        out.extend(&self.pool);
        out.extend(0x0021u16.to_be_bytes());
        out.extend(this_class.to_be_bytes());
        out.extend(super_class.to_be_bytes());
        out.extend(0u16.to_be_bytes());
        out.extend((self.fields.len() as u16).to_be_bytes());
        for field in &self.fields {
            out.extend(field);
        }
        out.extend((self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            out.extend(method);
        }
        out.extend((attributes.len() as u16).to_be_bytes());
        for attr in attributes {
            out.extend(attr);
        }
        out
    }
}
