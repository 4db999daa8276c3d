use crate::backend::Element;
use crate::error::{Error, Result};
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn_dataset::network::downloader::download_file_as_bytes;
use burn_dataset::{
    Dataset, InMemDataset,
    transform::{Mapper, MapperDataset},
};
use flate2::read::GzDecoder;
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::fs::{File, create_dir_all};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

// CVDF mirror of http://yann.lecun.com/exdb/mnist/
const URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";
pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
pub const NUM_CLASSES: usize = 10;

/// How many of the training items are held out for validation.
pub const VALIDATION_LEN: usize = 10_000;

/// MNIST item.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MnistItem {
    /// Image as a flat array of floats.
    /// Each value is a brightness, in between 0.0 and 255.0.
    ///
    /// # Shape
    /// [WIDTH * HEIGHT]
    pub image: Vec<Element>,

    /// Label of the image.
    /// Each value is in between 0 and 9.
    pub label: u8,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MnistItemRaw {
    pub image_bytes: Vec<u8>,
    pub label: u8,
}

pub struct BytesToImage;

impl Mapper<MnistItemRaw, MnistItem> for BytesToImage {
    fn map(&self, item: &MnistItemRaw) -> MnistItem {
        debug_assert_eq!(item.image_bytes.len(), WIDTH * HEIGHT);

        let image: Vec<Element> = item
            .image_bytes
            .iter()
            .map(|brightness| {
                let element: Element = (*brightness).as_();
                element
            })
            .collect();

        MnistItem {
            image,
            label: item.label,
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<MnistItemRaw>, BytesToImage, MnistItemRaw>;

/// One split of MNIST, converted to floats on access.
pub struct MnistDataset {
    dataset: MappedDataset,
}

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MnistDataset {
    pub fn new(items: Vec<MnistItemRaw>) -> Self {
        let dataset = InMemDataset::new(items);
        let dataset = MapperDataset::new(dataset, BytesToImage);
        Self { dataset }
    }
}

/// The three splits used for a training run.
pub struct MnistSplits {
    pub train: MnistDataset,
    pub validation: MnistDataset,
    pub test: MnistDataset,
}

/// The MNIST dataset consists of 70,000 28x28 black-and-white images in 10 classes (one for each digits).
/// There are 60,000 training images and 10,000 test images.
///
/// The data is downloaded from the web from the [CVDF mirror](https://github.com/cvdfoundation/mnist),
/// or read from a directory already holding the uncompressed idx files.
#[derive(Debug, Clone)]
pub struct Mnist {
    train: Vec<MnistItemRaw>,
    test: Vec<MnistItemRaw>,
    validation_len: usize,
}

impl Mnist {
    pub fn new(train: Vec<MnistItemRaw>, test: Vec<MnistItemRaw>) -> Self {
        Self {
            train,
            test,
            validation_len: VALIDATION_LEN,
        }
    }

    /// Number of trailing training items held out as the validation split.
    pub fn with_validation_len(mut self, validation_len: usize) -> Self {
        self.validation_len = validation_len;
        self
    }

    /// Downloads (if not cached) and loads the dataset.
    pub fn download() -> Result<Self> {
        // Dataset files are stored in the burn-dataset cache directory
        let cache_dir = dirs::home_dir()
            .ok_or(Error::NoHomeDir)?
            .join(".cache")
            .join("burn-dataset")
            .join("mnist");
        create_dir_all(&cache_dir).map_err(|e| Error::io(&cache_dir, e))?;

        for name in [TRAIN_IMAGES, TRAIN_LABELS, TEST_IMAGES, TEST_LABELS] {
            download_file(name, &cache_dir)?;
        }

        Self::from_dir(&cache_dir)
    }

    /// Loads the uncompressed idx files from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        log::info!("Loading MNIST from {dir:?}");
        let train = read_split(dir, TRAIN_IMAGES, TRAIN_LABELS)?;
        let test = read_split(dir, TEST_IMAGES, TEST_LABELS)?;
        log::info!("Loaded {} train and {} test items", train.len(), test.len());
        Ok(Self::new(train, test))
    }

    /// The last `validation_len` training items become the validation split.
    pub fn into_splits(self) -> MnistSplits {
        let Self {
            mut train,
            test,
            validation_len,
        } = self;
        let split_at = train.len().saturating_sub(validation_len);
        let validation = train.split_off(split_at);
        MnistSplits {
            train: MnistDataset::new(train),
            validation: MnistDataset::new(validation),
            test: MnistDataset::new(test),
        }
    }
}

/// Download a file from the MNIST dataset URL to the destination directory, decompressing it.
fn download_file(name: &str, dest_dir: &Path) -> Result<PathBuf> {
    let file_name = dest_dir.join(name);

    if !file_name.exists() {
        log::info!("Downloading {name}");
        let bytes = download_file_as_bytes(&format!("{URL}{name}.gz"), name);
        decompress_to(&bytes, &file_name)?;
    }

    Ok(file_name)
}

/// Gunzips `bytes` into `path`.
///
/// The data goes to a `.part` sibling first and is renamed once complete,
/// so `path` only ever exists with the whole file in it.
fn decompress_to(bytes: &[u8], path: &Path) -> Result<()> {
    let part = path.with_extension("part");
    let written = File::create(&part).and_then(|mut output_file| {
        let mut gz_buffer = GzDecoder::new(bytes);
        std::io::copy(&mut gz_buffer, &mut output_file)?;
        output_file.sync_all()
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&part);
        return Err(Error::io(path, e));
    }
    std::fs::rename(&part, path).map_err(|e| Error::io(path, e))
}

fn read_split(dir: &Path, images: &str, labels: &str) -> Result<Vec<MnistItemRaw>> {
    let images_path = dir.join(images);
    let labels_path = dir.join(labels);
    let images = read_images(&images_path)?;
    let labels = read_labels(&labels_path)?;
    if images.len() != labels.len() {
        return Err(Error::Idx {
            path: labels_path,
            reason: format!("{} labels for {} images", labels.len(), images.len()),
        });
    }
    Ok(images
        .into_iter()
        .zip(labels)
        .map(|(image_bytes, label)| MnistItemRaw { image_bytes, label })
        .collect())
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::io(path, e))
}

/// Read the images of an idx3 file. Each image is a vector of bytes.
pub fn read_images(path: &Path) -> Result<Vec<Vec<u8>>> {
    let mut f = open(path)?;
    parse_images(&mut f).map_err(|reason| idx_error(path, reason))
}

/// Read the labels of an idx1 file.
pub fn read_labels(path: &Path) -> Result<Vec<u8>> {
    let mut f = open(path)?;
    parse_labels(&mut f).map_err(|reason| idx_error(path, reason))
}

fn idx_error(path: &Path, reason: String) -> Error {
    Error::Idx {
        path: path.to_path_buf(),
        reason,
    }
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> std::result::Result<u32, String> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| format!("failed to read {what}: {e}"))?;
    Ok(u32::from_be_bytes(buf))
}

fn check_magic(found: u32, expected: u32) -> std::result::Result<(), String> {
    if found != expected {
        return Err(format!("magic number {found}, expected {expected}"));
    }
    Ok(())
}

/// Reads exactly `expected` bytes, growing the buffer only as data arrives.
fn read_payload<R: Read>(
    reader: &mut R,
    expected: usize,
) -> std::result::Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    reader
        .take(expected as u64)
        .read_to_end(&mut buf)
        .map_err(|e| e.to_string())?;
    if buf.len() != expected {
        return Err(format!("got {} of {expected} bytes", buf.len()));
    }
    Ok(buf)
}

/// Parse an idx3 stream: magic, count, rows, columns, then `count * rows * columns` bytes.
pub fn parse_images<R: Read>(reader: &mut R) -> std::result::Result<Vec<Vec<u8>>, String> {
    check_magic(read_u32(reader, "magic number")?, IMAGES_MAGIC)?;
    let size = read_u32(reader, "image count")? as usize;
    let rows = read_u32(reader, "row count")? as usize;
    let cols = read_u32(reader, "column count")? as usize;
    if (rows, cols) != (HEIGHT, WIDTH) {
        return Err(format!("images are {rows}x{cols}, expected {HEIGHT}x{WIDTH}"));
    }

    let expected = size
        .checked_mul(WIDTH * HEIGHT)
        .ok_or_else(|| format!("image count {size} is too large"))?;
    let buf_images = read_payload(reader, expected)
        .map_err(|e| format!("truncated image data for {size} images: {e}"))?;

    Ok(buf_images
        .chunks(WIDTH * HEIGHT)
        .map(|chunk| chunk.to_vec())
        .collect())
}

/// Parse an idx1 stream: magic, count, then `count` label bytes.
pub fn parse_labels<R: Read>(reader: &mut R) -> std::result::Result<Vec<u8>, String> {
    check_magic(read_u32(reader, "magic number")?, LABELS_MAGIC)?;
    let size = read_u32(reader, "label count")? as usize;

    let buf_labels = read_payload(reader, size)
        .map_err(|e| format!("truncated label data for {size} labels: {e}"))?;

    if let Some(label) = buf_labels.iter().find(|&&l| l as usize >= NUM_CLASSES) {
        return Err(format!("label {label} out of range"));
    }
    Ok(buf_labels)
}

#[derive(Clone, Default)]
pub struct MnistBatcher {}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// Brightness scaled into [0, 1].
    ///
    /// # Shape
    /// [batch_size, WIDTH * HEIGHT]
    pub images: Tensor<B, 2>,
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let batch_size = items.len();
        let mut pixels: Vec<Element> = Vec::with_capacity(batch_size * WIDTH * HEIGHT);
        let mut labels: Vec<i64> = Vec::with_capacity(batch_size);
        for item in items {
            pixels.extend(item.image);
            labels.push(item.label as i64);
        }

        let images =
            TensorData::new(pixels, [batch_size, WIDTH * HEIGHT]).convert::<B::FloatElem>();
        let images = Tensor::<B, 2>::from_data(images, device) / 255.0;

        let targets = TensorData::new(labels, [batch_size]).convert::<B::IntElem>();
        let targets = Tensor::<B, 1, Int>::from_data(targets, device);

        MnistBatch { images, targets }
    }
}
