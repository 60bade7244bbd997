//! はんだ接合部判定モデルの定義
//!
//! MobileNetV2をバックボーンとし、全体平均プーリングの後に単一出力の
//! シグモイドヘッドを持つ二値分類器を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

/// 逆残差ブロックの構成 (拡張率 t, 出力チャネル c, 繰り返し n, ストライド s)
const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

const STEM_CHANNELS: usize = 32;
const LAST_CHANNELS: usize = 1280;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// チャネル数の倍率
    #[config(default = 1.0)]
    pub width_multiplier: f32,
    /// ドロップアウト率（推論時は無効）
    #[config(default = 0.2)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub input_size: usize,
}

/// チャネル数を8の倍数に丸める（元の値の90%を下回らない）
fn make_divisible(value: f32, divisor: usize) -> usize {
    let divisor_f = divisor as f32;
    let rounded = ((value + divisor_f / 2.0) / divisor_f).floor() as usize * divisor;
    let mut channels = rounded.max(divisor);
    if (channels as f32) < 0.9 * value {
        channels += divisor;
    }
    channels
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> SolderNet<B> {
        let width = self.width_multiplier;
        let stem_channels = make_divisible(STEM_CHANNELS as f32 * width, 8);
        let last_channels = make_divisible(LAST_CHANNELS as f32 * width.max(1.0), 8);

        let stem = ConvBnAct::new(3, stem_channels, 3, 2, 1, true, device);

        let mut blocks = Vec::new();
        let mut in_channels = stem_channels;
        for &(expansion, channels, repeats, stride) in INVERTED_RESIDUAL_SETTINGS.iter() {
            let out_channels = make_divisible(channels as f32 * width, 8);
            for i in 0..repeats {
                let block_stride = if i == 0 { stride } else { 1 };
                blocks.push(InvertedResidual::new(
                    in_channels,
                    out_channels,
                    block_stride,
                    expansion,
                    device,
                ));
                in_channels = out_channels;
            }
        }

        let head = ConvBnAct::new(in_channels, last_channels, 1, 1, 1, true, device);

        SolderNet {
            stem,
            blocks,
            head,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            classifier: LinearConfig::new(last_channels, 1).init(device),
        }
    }
}

/// 畳み込み + バッチ正規化 + ReLU6
#[derive(Module, Debug)]
pub struct ConvBnAct<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
    activate: bool,
}

impl<B: Backend> ConvBnAct<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        activate: bool,
        device: &B::Device,
    ) -> Self {
        let padding = kernel_size / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            activate,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        if self.activate {
            // ReLU6
            x.clamp(0.0, 6.0)
        } else {
            x
        }
    }
}

/// 逆残差ブロック（拡張 1x1 → 深さ方向 3x3 → 射影 1x1）
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBnAct<B>>,
    depthwise: ConvBnAct<B>,
    project: ConvBnAct<B>,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expansion: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expansion;
        let expand = if expansion != 1 {
            Some(ConvBnAct::new(in_channels, hidden, 1, 1, 1, true, device))
        } else {
            None
        };

        Self {
            expand,
            depthwise: ConvBnAct::new(hidden, hidden, 3, stride, hidden, true, device),
            project: ConvBnAct::new(hidden, out_channels, 1, 1, 1, false, device),
            use_residual: stride == 1 && in_channels == out_channels,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.depthwise.forward(x);
        let x = self.project.forward(x);

        if self.use_residual {
            x + input
        } else {
            x
        }
    }
}

/// はんだ接合部の欠陥判定モデル
///
/// # アーキテクチャ
/// - Conv 3x3 stride 2 + BN + ReLU6
/// - 逆残差ブロック x 17
/// - Conv 1x1 + BN + ReLU6
/// - 全体平均プーリング → Dropout → Linear(1) → Sigmoid
#[derive(Module, Debug)]
pub struct SolderNet<B: Backend> {
    stem: ConvBnAct<B>,
    blocks: Vec<InvertedResidual<B>>,
    head: ConvBnAct<B>,
    pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    classifier: Linear<B>,
}

impl<B: Backend> SolderNet<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: 前処理済み画像 [batch_size, size, size, 3] (NHWC)
    ///
    /// # 戻り値
    /// - 欠陥確率 [batch_size, 1]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        // NHWC -> NCHW
        let x = images.permute([0, 3, 1, 2]);

        let mut x = self.stem.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.head.forward(x);

        let x = self.pool.forward(x);
        let [_, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);
        let x = self.dropout.forward(x);

        sigmoid(self.classifier.forward(x))
    }
}
